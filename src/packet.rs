use crate::mac::{MacAddr, MAC_SIZE};
use crate::secret::{Secret, SECRET_MAX_SIZE};

const SYNCHRONIZATION_SCHEME: [u8; HEADER_SIZE] = [0xff; HEADER_SIZE];

pub const HEADER_SIZE: usize = 6;
pub const MAC_REPETITIONS: usize = 16;
// Header plus the repeated MAC; the secret, if any, follows.
pub const BODY_SIZE: usize = HEADER_SIZE + MAC_REPETITIONS * MAC_SIZE;
pub const MAX_PACKET_SIZE: usize = BODY_SIZE + SECRET_MAX_SIZE;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("packet is {0} bytes, a magic packet needs at least {BODY_SIZE}")]
    ShortPacket(usize),
    #[error("packet is {0} bytes, a magic packet is at most {MAX_PACKET_SIZE}")]
    OversizedPacket(usize),
    #[error("packet does not start with the synchronization header")]
    BadHeader,
    #[error("packet repetitions do not all carry the same MAC address")]
    BadMacReplication,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MagicPacket {
    pub mac: MacAddr,
    pub secret: Secret,
}

impl MagicPacket {
    pub fn new(mac: MacAddr, secret: Secret) -> Self {
        Self { mac, secret }
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(BODY_SIZE + self.secret.len());
        data.extend(&SYNCHRONIZATION_SCHEME);
        for _ in 0..MAC_REPETITIONS {
            data.extend(self.mac.octets());
        }
        data.extend(self.secret.as_bytes());
        data
    }

    pub fn from_raw(input: &[u8]) -> Result<MagicPacket, Error> {
        if input.len() < BODY_SIZE {
            return Err(Error::ShortPacket(input.len()));
        }
        if input.len() > MAX_PACKET_SIZE {
            return Err(Error::OversizedPacket(input.len()));
        }
        if input[..HEADER_SIZE] != SYNCHRONIZATION_SCHEME {
            return Err(Error::BadHeader);
        }
        let body = &input[HEADER_SIZE..BODY_SIZE];
        let first = &body[..MAC_SIZE];
        if body.chunks_exact(MAC_SIZE).any(|copy| copy != first) {
            return Err(Error::BadMacReplication);
        }
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(first);
        let secret = Secret::new(&input[BODY_SIZE..])
            .map_err(|_| Error::OversizedPacket(input.len()))?;
        Ok(MagicPacket {
            mac: MacAddr(mac),
            secret,
        })
    }
}

/// Formats a buffer as colon separated hex, sixteen bytes per tab-indented
/// line.
pub fn hex_dump(buf: &[u8]) -> String {
    buf.chunks(16)
        .map(|line| {
            let octets: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
            format!("\t{}", octets.join(":"))
        })
        .collect::<Vec<String>>()
        .join("\n")
}
