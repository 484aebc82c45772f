// Configuration file loader.
//
// Each line is a run of whitespace separated `key value` pairs. `[name]`
// switches the current host group, `gateway` and `host` switch the subject
// of the keys after them. Anything not understood is fatal and names the
// file and line.

use crate::delay;
use crate::mac::MacAddr;
use crate::model::{parse_port, GatewayId, GroupId, HostId, Registry};
use crate::secret::Secret;
use log::debug;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const GLOBAL_CONFIG: &str = "/etc/wolgate.conf";
pub const USER_CONFIG: &str = ".wolgate.conf";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("{path}#{line}: {key}: Invalid option")]
    InvalidOption {
        path: String,
        line: usize,
        key: String,
    },
    #[error("{path}#{line}: {value}: Invalid value for {key}: {reason}")]
    InvalidValue {
        path: String,
        line: usize,
        key: String,
        value: String,
        reason: String,
    },
    #[error("{path}#{line}: {key}: Missing value")]
    MissingValue {
        path: String,
        line: usize,
        key: String,
    },
}

/// Reads the system wide and per-user files. Either may be absent.
pub fn load_defaults(registry: &mut Registry) -> Result<(), Error> {
    let mut paths = vec![PathBuf::from(GLOBAL_CONFIG)];
    if let Some(home) = env::var_os("HOME") {
        paths.push(Path::new(&home).join(USER_CONFIG));
    }
    for path in paths {
        match load_file(registry, &path) {
            Err(Error::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!("[No config at {}]", path.display());
            }
            r => r?,
        }
    }
    Ok(())
}

pub fn load_file(registry: &mut Registry, path: &Path) -> Result<(), Error> {
    let label = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| Error::Io {
        path: label.clone(),
        source,
    })?;
    debug!("[Parsing config: {}]", label);
    load_str(registry, &label, &contents)
}

/// Applies configuration text to `registry`. `path` only labels errors.
pub fn load_str(registry: &mut Registry, path: &str, contents: &str) -> Result<(), Error> {
    let mut parser = Parser {
        registry,
        path,
        line: 0,
        gateway: None,
        group: None,
        host: None,
    };
    parser.gateway = Some(parser.registry.default_gateway());
    for (i, text) in contents.lines().enumerate() {
        parser.line = i + 1;
        parser.parse_line(strip_comment(text))?;
    }
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    match line.find(|c| c == '#' || c == ';') {
        Some(i) => &line[..i],
        None => line,
    }
}

struct Parser<'a> {
    registry: &'a mut Registry,
    path: &'a str,
    line: usize,
    // Survives across lines until the next group header.
    gateway: Option<GatewayId>,
    group: Option<GroupId>,
    // Only for the rest of the current line.
    host: Option<HostId>,
}

impl<'a> Parser<'a> {
    fn parse_line(&mut self, text: &str) -> Result<(), Error> {
        self.host = None;
        let mut tokens = text.split_whitespace();
        while let Some(key) = tokens.next() {
            if let Some(name) = key.strip_prefix('[').and_then(|k| k.strip_suffix(']')) {
                self.start_group(name)?;
                continue;
            }
            let value = tokens.next().ok_or_else(|| Error::MissingValue {
                path: self.path.to_string(),
                line: self.line,
                key: key.to_string(),
            })?;
            self.apply(key, value)?;
        }
        Ok(())
    }

    fn start_group(&mut self, name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(self.invalid_option("[]"));
        }
        debug!("[Switching hostgroup to {}]", name);
        self.group = Some(self.registry.create_group(name));
        self.gateway = self.registry.lookup_gateway(name);
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match (key, self.host) {
            ("host", _) => {
                self.start_host(value);
                Ok(())
            }
            ("gateway", _) => {
                self.gateway = Some(self.registry.create_gateway(value));
                self.host = None;
                Ok(())
            }
            ("hostdelay", _) => {
                let group = self.group.ok_or_else(|| self.invalid_option(key))?;
                let delay = self.parse(key, value, parse_time)?;
                self.registry.group_mut(group).delay = Some(delay);
                Ok(())
            }
            ("mac", Some(host)) => {
                let mac = self.parse(key, value, |v| {
                    MacAddr::resolve(v).map_err(|e| e.to_string())
                })?;
                self.registry.host_mut(host).mac = mac;
                Ok(())
            }
            ("via", Some(host)) => {
                let via = self.parse(key, value, |v| {
                    self.registry
                        .lookup_gateway(v)
                        .ok_or_else(|| "no such gateway".to_string())
                })?;
                self.registry.host_mut(host).via = Some(via);
                Ok(())
            }
            ("copies", Some(host)) => {
                let copies = self.parse(key, value, parse_copies)?;
                self.registry.host_mut(host).copies = Some(copies);
                Ok(())
            }
            ("delay", Some(host)) => {
                let delay = self.parse(key, value, parse_time)?;
                self.registry.host_mut(host).delay = Some(delay);
                Ok(())
            }
            ("secret", Some(host)) => {
                let secret = self.parse(key, value, parse_secret)?;
                self.registry.host_mut(host).secret = Some(secret);
                Ok(())
            }
            ("copies" | "delay" | "secret" | "address" | "port", None) => {
                self.apply_gateway(key, value)
            }
            _ => Err(self.invalid_option(key)),
        }
    }

    fn apply_gateway(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let id = self.gateway.ok_or_else(|| self.invalid_option(key))?;
        match key {
            "copies" => {
                let copies = self.parse(key, value, parse_copies)?;
                self.registry.gateway_mut(id).copies = Some(copies);
            }
            "delay" => {
                let delay = self.parse(key, value, parse_time)?;
                self.registry.gateway_mut(id).delay = Some(delay);
            }
            "secret" => {
                let secret = self.parse(key, value, parse_secret)?;
                self.registry.gateway_mut(id).secret = Some(secret);
            }
            "address" => self.registry.gateway_mut(id).address = value.to_string(),
            "port" => {
                self.parse(key, value, |v| {
                    parse_port(v).ok_or_else(|| "unknown port or service".to_string())
                })?;
                self.registry.gateway_mut(id).port = value.to_string();
            }
            _ => return Err(self.invalid_option(key)),
        }
        Ok(())
    }

    fn start_host(&mut self, name: &str) {
        let host = self.registry.create_host(name, self.gateway);
        if let Some(gateway) = self.gateway {
            self.registry.host_mut(host).via = Some(gateway);
        }
        // A name listed in the ethers file or written as an address
        // needs no `mac` key.
        if self.registry.host(host).mac.is_zero() {
            if let Ok(mac) = MacAddr::resolve(name) {
                self.registry.host_mut(host).mac = mac;
            }
        }
        if let Some(group) = self.group {
            self.registry.add_to_group(group, host);
        }
        self.host = Some(host);
    }

    fn parse<T, F>(&self, key: &str, value: &str, func: F) -> Result<T, Error>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        func(value).map_err(|reason| Error::InvalidValue {
            path: self.path.to_string(),
            line: self.line,
            key: key.to_string(),
            value: value.to_string(),
            reason,
        })
    }

    fn invalid_option(&self, key: &str) -> Error {
        Error::InvalidOption {
            path: self.path.to_string(),
            line: self.line,
            key: key.to_string(),
        }
    }
}

fn parse_copies(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err("expected a positive count".to_string()),
    }
}

fn parse_time(value: &str) -> Result<std::time::Duration, String> {
    delay::parse_delay(value).map_err(|e| e.to_string())
}

fn parse_secret(value: &str) -> Result<Secret, String> {
    value.parse::<Secret>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::model::ALL_GROUP;
    use std::io::Write;
    use std::{env, fs};
    use std::time::Duration;

    const SAMPLE: &str = "
# lab network
copies 2

gateway lab address 192.0.2.255 port discard secret 1.2.3.4
host pc1 mac aa:bb:cc:dd:ee:01 ; trailing comment
host pc2 mac aa-bb-cc-dd-ee-02 copies 5 delay 20ms

[lab]
hostdelay 1s
host pc3 mac aa:bb:cc:dd:ee:03
host pc1

[office]
host 00:11:22:33:44:55
";

    fn load(contents: &str) -> Result<Registry, Error> {
        let mut registry = Registry::new();
        load_str(&mut registry, "test.conf", contents)?;
        Ok(registry)
    }

    #[test]
    fn test_sample_config() {
        let registry = load(SAMPLE).unwrap();
        let default = registry.gateway(registry.default_gateway());
        assert_eq!(default.copies, Some(2));

        let lab_id = registry.lookup_gateway("lab").unwrap();
        let lab = registry.gateway(lab_id);
        assert_eq!(lab.address, "192.0.2.255");
        assert_eq!(lab.port, "discard");
        assert_eq!(lab.secret, Some(Secret::new(&[1, 2, 3, 4]).unwrap()));
        // Created after `copies 2` on the default gateway.
        assert_eq!(lab.copies, Some(2));

        let pc2 = registry.host(registry.lookup_host("pc2").unwrap());
        assert_eq!(pc2.mac, MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]));
        assert_eq!(pc2.via, Some(lab_id));
        assert_eq!(pc2.copies, Some(5));
        assert_eq!(pc2.delay, Some(Duration::from_millis(20)));

        let group = registry.lookup_group("lab").unwrap();
        assert_eq!(registry.group(group).delay, Some(Duration::from_secs(1)));
        let members: Vec<&str> = registry
            .group(group)
            .hosts()
            .iter()
            .map(|h| registry.host(*h).name())
            .collect();
        assert_eq!(members, ["pc3", "pc1"]);

        // No gateway called "office": hosts there fall back to the default.
        let literal = registry.host(registry.lookup_host("00:11:22:33:44:55").unwrap());
        assert_eq!(literal.mac, MacAddr([0, 0x11, 0x22, 0x33, 0x44, 0x55]));
        assert_eq!(literal.via, None);

        let all = registry.group(registry.lookup_group(ALL_GROUP).unwrap());
        assert_eq!(all.hosts().len(), 4);
    }

    macro_rules! test_config_error {
        ($name:ident, $contents:expr, $pattern:pat) => {
            #[test]
            fn $name() {
                let err = load($contents).unwrap_err();
                assert!(matches!(err, $pattern), "got {:?}", err);
            }
        };
    }

    test_config_error!(
        test_unknown_key,
        "gateway lab\nfrobnicate yes",
        Error::InvalidOption { line: 2, .. }
    );
    test_config_error!(
        test_mac_without_host,
        "mac aa:bb:cc:dd:ee:ff",
        Error::InvalidOption { line: 1, .. }
    );
    test_config_error!(
        test_port_on_host_line,
        "host pc1 port 9",
        Error::InvalidOption { line: 1, .. }
    );
    test_config_error!(
        test_gateway_key_in_group_without_gateway,
        "[nowhere]\ncopies 3",
        Error::InvalidOption { line: 2, .. }
    );
    test_config_error!(
        test_hostdelay_outside_group,
        "hostdelay 1s",
        Error::InvalidOption { line: 1, .. }
    );
    test_config_error!(
        test_missing_value,
        "\n\nhost pc1 mac",
        Error::MissingValue { line: 3, .. }
    );
    test_config_error!(
        test_bad_copies,
        "copies none",
        Error::InvalidValue { line: 1, .. }
    );
    test_config_error!(
        test_zero_copies,
        "copies 0",
        Error::InvalidValue { line: 1, .. }
    );
    test_config_error!(
        test_bad_delay,
        "delay 5fortnights",
        Error::InvalidValue { line: 1, .. }
    );
    test_config_error!(
        test_bad_mac,
        "host pc1 mac aa:bb:cc",
        Error::InvalidValue { line: 1, .. }
    );
    test_config_error!(
        test_unknown_via,
        "host pc1 via nowhere",
        Error::InvalidValue { line: 1, .. }
    );
    test_config_error!(
        test_bad_port,
        "port gopher",
        Error::InvalidValue { line: 1, .. }
    );

    #[test]
    fn test_error_names_file_and_line() {
        let err = load("\nhost pc1 colour blue").unwrap_err();
        assert_eq!(err.to_string(), "test.conf#2: colour: Invalid option");
    }

    #[test]
    fn test_host_keys_end_with_the_line() {
        let registry = load("host pc1\ncopies 4").unwrap();
        let pc1 = registry.host(registry.lookup_host("pc1").unwrap());
        assert_eq!(pc1.copies, None);
        assert_eq!(registry.gateway(registry.default_gateway()).copies, Some(4));
    }

    #[test]
    fn test_load_file() {
        let path = env::temp_dir().join(format!("wolgate-test-{}.conf", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "host pc9 mac 02:00:00:00:00:09").unwrap();
        drop(file);

        let mut registry = Registry::new();
        load_file(&mut registry, &path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(registry.lookup_host("pc9").is_some());

        assert!(matches!(
            load_file(&mut registry, &path),
            Err(Error::Io { .. })
        ));
    }
}
