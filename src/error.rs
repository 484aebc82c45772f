use crate::mac::MacAddr;
use crate::packet;
use std::fmt;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    ConfigResolution(String),
    #[error("{0}: Invalid MAC address for host")]
    InvalidMac(MacAddr),
    #[error("malformed magic packet: {0}")]
    Packet(#[from] packet::Error),
    #[error("secret does not match the gateway secret")]
    SecretMismatch,
    #[error("no host configured with MAC address {0}")]
    UnknownHost(MacAddr),
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}

/// A failed send, tagged with the host it was meant for.
#[derive(Debug)]
pub struct HostError {
    pub host: String,
    pub source: Error,
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.source)
    }
}
