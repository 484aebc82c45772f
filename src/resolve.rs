use crate::delay;
use crate::error::Error;
use crate::model::{GatewayId, HostId, Registry};
use crate::secret::Secret;
use log::debug;
use std::time::Duration;

pub const DEFAULT_COPIES: u32 = 1;

/// Where an override sends packets: a configured gateway by name, or an
/// anonymous gateway already added to the registry.
#[derive(Clone, Debug, PartialEq)]
pub enum Destination {
    Named(String),
    Gateway(GatewayId),
}

/// Command line values that take precedence over everything configured.
/// Values stay textual until a host is resolved, so a bad value fails that
/// host's send rather than startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides {
    pub destination: Option<Destination>,
    pub copies: Option<String>,
    pub delay: Option<String>,
    pub secret: Option<String>,
}

/// Effective send parameters for one host.
#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub gateway: GatewayId,
    pub copies: u32,
    pub delay: Duration,
    pub secret: Secret,
}

pub fn parse_copies(copies: &str) -> Result<u32, Error> {
    match copies.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::ConfigResolution(format!(
            "{}: Invalid packet copy count",
            copies
        ))),
    }
}

pub fn parse_delay(value: &str) -> Result<Duration, Error> {
    delay::parse_delay(value).map_err(|err| Error::ConfigResolution(err.to_string()))
}

pub fn parse_secret(value: &str) -> Result<Secret, Error> {
    value
        .parse()
        .map_err(|err: crate::secret::ParseError| Error::ConfigResolution(err.to_string()))
}

impl Registry {
    /// Computes the parameters for sending to `id`.
    ///
    /// Each value comes from the first of: the override, the host, the
    /// host's gateway, a built-in default. Overrides are also stored on the
    /// host, so later sends to it see them even without overrides. The
    /// gateway is the override destination, else the host's own, else the
    /// default gateway.
    pub fn resolve(&mut self, id: HostId, overrides: &Overrides) -> Result<Params, Error> {
        let mac = self.host(id).mac;
        if mac.is_zero() {
            return Err(Error::InvalidMac(mac));
        }

        let via = match &overrides.destination {
            Some(Destination::Named(name)) => Some(self.lookup_gateway(name).ok_or_else(|| {
                Error::ConfigResolution(format!("{}: No such gateway", name))
            })?),
            Some(Destination::Gateway(gateway)) => Some(*gateway),
            None => None,
        };
        let copies = overrides.copies.as_deref().map(parse_copies).transpose()?;
        let delay = overrides.delay.as_deref().map(parse_delay).transpose()?;
        let secret = overrides.secret.as_deref().map(parse_secret).transpose()?;

        let host = self.host_mut(id);
        if via.is_some() {
            host.via = via;
        }
        if copies.is_some() {
            host.copies = copies;
        }
        if delay.is_some() {
            host.delay = delay;
        }
        if secret.is_some() {
            host.secret = secret;
        }

        let host = self.host(id);
        let gateway_id = host.via.unwrap_or(self.default_gateway());
        let gateway = self.gateway(gateway_id);
        let params = Params {
            gateway: gateway_id,
            copies: host.copies.or(gateway.copies).unwrap_or(DEFAULT_COPIES),
            delay: host.delay.or(gateway.delay).unwrap_or(Duration::ZERO),
            secret: host
                .secret
                .clone()
                .or_else(|| gateway.secret.clone())
                .unwrap_or_default(),
        };
        debug!("{}: resolved {:?}", host.name(), params);
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use crate::mac::MacAddr;
    use crate::model::Gateway;
    use crate::resolve::*;

    const MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    fn registry_with_host(via: Option<&str>) -> (Registry, HostId) {
        let mut registry = Registry::new();
        let via = via.map(|name| registry.create_gateway(name));
        let h = registry.create_host("h", via);
        registry.host_mut(h).mac = MAC;
        (registry, h)
    }

    #[test]
    fn test_builtin_defaults() {
        let (mut registry, h) = registry_with_host(None);
        let params = registry.resolve(h, &Overrides::default()).unwrap();
        assert_eq!(
            params,
            Params {
                gateway: registry.default_gateway(),
                copies: 1,
                delay: Duration::ZERO,
                secret: Secret::default(),
            }
        );
        // The fallback to the default gateway is not written back.
        assert_eq!(registry.host(h).via, None);
    }

    #[test]
    fn test_gateway_value_used_when_host_unset() {
        let (mut registry, h) = registry_with_host(Some("lab"));
        let gw = registry.lookup_gateway("lab").unwrap();
        registry.gateway_mut(gw).copies = Some(5);
        registry.gateway_mut(gw).delay = Some(Duration::from_millis(10));
        let params = registry.resolve(h, &Overrides::default()).unwrap();
        assert_eq!(params.gateway, gw);
        assert_eq!(params.copies, 5);
        assert_eq!(params.delay, Duration::from_millis(10));
    }

    #[test]
    fn test_override_wins_and_sticks() {
        let (mut registry, h) = registry_with_host(Some("lab"));
        let gw = registry.lookup_gateway("lab").unwrap();
        registry.gateway_mut(gw).copies = Some(5);
        let overrides = Overrides {
            copies: Some("2".into()),
            ..Default::default()
        };
        assert_eq!(registry.resolve(h, &overrides).unwrap().copies, 2);
        assert_eq!(registry.host(h).copies, Some(2));
        assert_eq!(registry.resolve(h, &Overrides::default()).unwrap().copies, 2);
    }

    #[test]
    fn test_host_value_beats_gateway() {
        let (mut registry, h) = registry_with_host(Some("lab"));
        let gw = registry.lookup_gateway("lab").unwrap();
        registry.gateway_mut(gw).secret = Some(Secret::new(b"gateway").unwrap());
        registry.host_mut(h).secret = Some(Secret::new(b"host").unwrap());
        let params = registry.resolve(h, &Overrides::default()).unwrap();
        assert_eq!(params.secret, Secret::new(b"host").unwrap());
    }

    #[test]
    fn test_explicit_zero_delay_does_not_inherit() {
        let (mut registry, h) = registry_with_host(Some("lab"));
        let gw = registry.lookup_gateway("lab").unwrap();
        registry.gateway_mut(gw).delay = Some(Duration::from_secs(1));
        registry.host_mut(h).delay = Some(Duration::ZERO);
        let params = registry.resolve(h, &Overrides::default()).unwrap();
        assert_eq!(params.delay, Duration::ZERO);
    }

    #[test]
    fn test_destination_override() {
        let (mut registry, h) = registry_with_host(Some("lab"));
        let other = registry.create_gateway("other");
        registry.gateway_mut(other).copies = Some(7);
        let overrides = Overrides {
            destination: Some(Destination::Named("other".into())),
            ..Default::default()
        };
        let params = registry.resolve(h, &overrides).unwrap();
        assert_eq!(params.gateway, other);
        assert_eq!(params.copies, 7);
        assert_eq!(registry.host(h).via, Some(other));

        let anon = registry.add_anonymous_gateway(Gateway::anonymous("10.0.0.1", "9"));
        let overrides = Overrides {
            destination: Some(Destination::Gateway(anon)),
            ..Default::default()
        };
        assert_eq!(registry.resolve(h, &overrides).unwrap().gateway, anon);
    }

    #[test]
    fn test_unknown_gateway_fails() {
        let (mut registry, h) = registry_with_host(None);
        let overrides = Overrides {
            destination: Some(Destination::Named("nowhere".into())),
            ..Default::default()
        };
        assert!(matches!(
            registry.resolve(h, &overrides),
            Err(Error::ConfigResolution(_))
        ));
    }

    #[test]
    fn test_bad_override_values_fail_without_side_effects() {
        let (mut registry, h) = registry_with_host(None);
        for overrides in [
            Overrides {
                copies: Some("many".into()),
                ..Default::default()
            },
            Overrides {
                copies: Some("0".into()),
                ..Default::default()
            },
            Overrides {
                delay: Some("soon".into()),
                ..Default::default()
            },
            Overrides {
                copies: Some("3".into()),
                secret: Some("z".repeat(65)),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                registry.resolve(h, &overrides),
                Err(Error::ConfigResolution(_))
            ));
        }
        assert_eq!(registry.host(h).copies, None);
    }

    #[test]
    fn test_zero_mac_is_invalid() {
        let mut registry = Registry::new();
        let h = registry.create_host("blank", None);
        registry.host_mut(h).copies = Some(3);
        let overrides = Overrides {
            secret: Some("1.2.3.4".into()),
            ..Default::default()
        };
        assert!(matches!(
            registry.resolve(h, &overrides),
            Err(Error::InvalidMac(mac)) if mac.is_zero()
        ));
        assert!(registry.host(h).secret.is_none());
    }
}
