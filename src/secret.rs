use std::fmt;
use std::str::FromStr;

pub const SECRET_MAX_SIZE: usize = 64;

/// SecureOn password carried after the magic packet body.
///
/// Equality compares both length and content, so `[1, 2, 3, 4]` and `[1, 2]`
/// are never equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("secret is {0} bytes, at most {SECRET_MAX_SIZE} are allowed")]
    TooLong(usize),
}

impl Secret {
    pub fn new(bytes: &[u8]) -> Result<Secret, ParseError> {
        if bytes.len() > SECRET_MAX_SIZE {
            return Err(ParseError::TooLong(bytes.len()));
        }
        Ok(Secret(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_dotted_quad(s: &str) -> Option<Vec<u8>> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    parts.iter().map(|p| p.parse::<u8>().ok()).collect()
}

// A single octet with no separator is taken as a literal, not as hex.
fn parse_hex_octets(s: &str) -> Option<Vec<u8>> {
    let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
    if parts.len() < 2 {
        return None;
    }
    parts
        .iter()
        .map(|p| {
            if p.is_empty() || p.len() > 2 {
                return None;
            }
            u8::from_str_radix(p, 16).ok()
        })
        .collect()
}

impl FromStr for Secret {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(bytes) = parse_dotted_quad(s) {
            return Secret::new(&bytes);
        }
        if let Some(bytes) = parse_hex_octets(s) {
            return Secret::new(&bytes);
        }
        Secret::new(s.as_bytes())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        if let [a, b, c, d] = self.0[..] {
            write!(f, "{a}.{b}.{c}.{d}")?;
        } else {
            let hex: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
            write!(f, "{}", hex.join(":"))?;
        }
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, " ({})", String::from_utf8_lossy(&self.0))?;
        }
        Ok(())
    }
}
