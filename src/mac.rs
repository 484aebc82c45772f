use log::debug;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

pub const MAC_SIZE: usize = 6;
pub const ETHERS_PATH: &str = "/etc/ethers";

/// A 48-bit hardware address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; MAC_SIZE]);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("MAC address needs exactly six octets")]
    WrongLength,
    #[error("MAC address has invalid octet {0:?}")]
    BadOctet(String),
}

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; MAC_SIZE]);

    // An all-zero address is what an unconfigured host carries.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn octets(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }

    /// Resolves a host name to a MAC, first through the ethers database and
    /// then as a literal address.
    pub fn resolve(name: &str) -> Result<MacAddr, ParseError> {
        match lookup_ethers(Path::new(ETHERS_PATH), name) {
            Ok(Some(mac)) => return Ok(mac),
            Ok(None) => {}
            Err(err) => debug!("skipping {}: {}", ETHERS_PATH, err),
        }
        name.parse()
    }
}

impl FromStr for MacAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if parts.len() != MAC_SIZE {
            return Err(ParseError::WrongLength);
        }
        let mut mac = [0u8; MAC_SIZE];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(ParseError::BadOctet(part.to_string()));
            }
            mac[i] =
                u8::from_str_radix(part, 16).map_err(|_| ParseError::BadOctet(part.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Looks up `name` in an ethers(5) style file of `<mac> <hostname>` lines.
pub fn lookup_ethers(path: &Path, name: &str) -> io::Result<Option<MacAddr>> {
    let contents = fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let (Some(mac), Some(host)) = (fields.next(), fields.next()) else {
            continue;
        };
        if host == name {
            if let Ok(mac) = mac.parse() {
                return Ok(Some(mac));
            }
        }
    }
    Ok(None)
}
