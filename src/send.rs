pub mod noop;

use crate::delay;
use crate::error::{Error, HostError};
use crate::mac::MacAddr;
use crate::metrics;
use crate::model::{GroupId, HostId, Registry, Target};
use crate::packet::{hex_dump, MagicPacket};
use crate::resolve::Overrides;
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

/// Puts one datagram on the wire.
pub trait Transmit {
    fn transmit(&mut self, target: &Target, payload: &[u8]) -> io::Result<()>;
}

pub fn retry<T, F>(mut func: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match func() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            r => return r,
        }
    }
}

/// Sends from one unbound broadcast-enabled socket per address family,
/// opened on first use.
#[derive(Default)]
pub struct UdpTransmitter {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl UdpTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket_for(&mut self, addr: &SocketAddr) -> io::Result<&UdpSocket> {
        let (slot, local) = match addr {
            SocketAddr::V4(_) => (&mut self.v4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
            SocketAddr::V6(_) => (&mut self.v6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))),
        };
        if slot.is_none() {
            let socket = UdpSocket::bind(local)?;
            if let Err(err) = socket.set_broadcast(true) {
                warn!("could not enable broadcast on {}: {}", local, err);
            }
            *slot = Some(socket);
        }
        slot.as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no socket"))
    }
}

impl Transmit for UdpTransmitter {
    fn transmit(&mut self, target: &Target, payload: &[u8]) -> io::Result<()> {
        let addr = target.addr();
        let socket = self.socket_for(&addr)?;
        retry(|| socket.send_to(payload, addr))?;
        Ok(())
    }
}

/// Sends magic packets for hosts and groups in a registry.
pub struct Sender<T: Transmit> {
    registry: Registry,
    transmit: T,
}

impl<T: Transmit> Sender<T> {
    pub fn new(registry: Registry, transmit: T) -> Self {
        Self { registry, transmit }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn transmit(&self) -> &T {
        &self.transmit
    }

    pub fn transmit_mut(&mut self) -> &mut T {
        &mut self.transmit
    }

    /// Wakes a group, host or literal address by name.
    ///
    /// A name that is neither a group nor a host becomes a new host if it
    /// resolves to a MAC address through the ethers database or as a
    /// literal.
    pub fn send_named(
        &mut self,
        name: &str,
        overrides: &Overrides,
        ignore_errors: bool,
    ) -> Result<(), HostError> {
        if let Some(group) = self.registry.lookup_group(name) {
            return self.send_group(group, overrides, ignore_errors);
        }
        if let Some(host) = self.registry.lookup_host(name) {
            return self.send_host(host, overrides);
        }
        let mac = MacAddr::resolve(name).map_err(|err| HostError {
            host: name.to_string(),
            source: Error::ConfigResolution(format!("{}: {}", name, err)),
        })?;
        let host = self.registry.create_host(name, None);
        self.registry.host_mut(host).mac = mac;
        self.send_host(host, overrides)
    }

    /// Wakes each name in turn, reporting every failure as it happens.
    /// Without `ignore_errors` the first failing name ends the run and the
    /// result is `false`; with it every name is tried and the run succeeds.
    pub fn send_names<I, S>(&mut self, names: I, overrides: &Overrides, ignore_errors: bool) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if let Err(err) = self.send_named(name, overrides, ignore_errors) {
                // A group failure names the member; a host failure already
                // matches the name given.
                let cause: &dyn fmt::Display = if err.host == name {
                    &err.source
                } else {
                    &err
                };
                error!("{}: Sending WoL packet failed: {}", name, cause);
                if !ignore_errors {
                    return false;
                }
            }
        }
        true
    }

    /// Sends to every member in order, pausing the group's delay between
    /// hosts. Unless `ignore_errors` is set the first failure stops the
    /// group.
    pub fn send_group(
        &mut self,
        group: GroupId,
        overrides: &Overrides,
        ignore_errors: bool,
    ) -> Result<(), HostError> {
        let group = self.registry.group(group);
        let members = group.hosts().to_vec();
        let spacing = group.delay.unwrap_or_default();
        debug!("[Sending to group {} ({} hosts)]", group.name(), members.len());
        for (i, host) in members.into_iter().enumerate() {
            if i > 0 {
                delay::pause(spacing);
            }
            if let Err(err) = self.send_host(host, overrides) {
                if !ignore_errors {
                    return Err(err);
                }
                warn!("{}, continuing", err);
            }
        }
        Ok(())
    }

    pub fn send_host(&mut self, host: HostId, overrides: &Overrides) -> Result<(), HostError> {
        self.wake(host, overrides).map_err(|source| HostError {
            host: self.registry.host(host).name().to_string(),
            source,
        })
    }

    fn wake(&mut self, id: HostId, overrides: &Overrides) -> Result<(), Error> {
        let params = self.registry.resolve(id, overrides)?;
        let host = self.registry.host(id);
        let payload = MagicPacket::new(host.mac, params.secret.clone()).payload();

        if params.secret.is_empty() {
            debug!("[{} ({})]", host.name(), host.mac);
        } else {
            debug!("[{} ({}) with secret {}]", host.name(), host.mac, params.secret);
        }
        trace!("UDP Packet:\n{}", hex_dump(&payload));
        info!("{} ({})", host.name(), host.mac);

        let targets = self.registry.gateway(params.gateway).targets();
        if targets.is_empty() {
            warn!("{}: gateway has no resolved targets", host.name());
        }
        for target in targets {
            for copy in 0..params.copies {
                if copy > 0 {
                    delay::pause(params.delay);
                }
                debug!("Sending packet #{} via {}", copy + 1, target);
                self.transmit.transmit(target, &payload)?;
                metrics::PACKETS_SENT.inc();
            }
        }
        Ok(())
    }
}
