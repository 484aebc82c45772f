use crate::model::Target;
use crate::send::Transmit;
use log::info;
use std::io;
#[cfg(test)]
use std::time::Instant;

/// Dry-run transmitter: everything up to the socket write happens, the
/// write itself is only logged.
pub struct LogOnlyTransmitter;

impl Transmit for LogOnlyTransmitter {
    fn transmit(&mut self, target: &Target, payload: &[u8]) -> io::Result<()> {
        info!("faking {} byte packet to {}", payload.len(), target);
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingTransmitter {
    pub sent: Vec<(Target, Vec<u8>)>,
    pub sent_at: Vec<Instant>,
    // Fail every write once this many have succeeded.
    pub fail_after: Option<usize>,
}

#[cfg(test)]
impl Transmit for RecordingTransmitter {
    fn transmit(&mut self, target: &Target, payload: &[u8]) -> io::Result<()> {
        if self.fail_after.map_or(false, |n| self.sent.len() >= n) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "sendto: permission denied",
            ));
        }
        self.sent.push((target.clone(), payload.to_vec()));
        self.sent_at.push(Instant::now());
        Ok(())
    }
}
