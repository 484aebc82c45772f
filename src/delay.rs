use log::debug;
use std::thread;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("time value {0:?} has no number")]
    MissingNumber(String),
    #[error("time value {0:?} has unknown unit {1:?}")]
    UnknownUnit(String, String),
    #[error("time value {0:?} is out of range")]
    OutOfRange(String),
}

/// Parses a decimal time value with an optional unit suffix (`ns`, `us`,
/// `ms`, `s`, `m`, `h`, `d`). A bare number is seconds.
pub fn parse_delay(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ParseError::MissingNumber(s.to_string()))?;
    let nanos_per_unit = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "" | "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 60.0 * 60.0 * 1e9,
        "d" => 24.0 * 60.0 * 60.0 * 1e9,
        _ => return Err(ParseError::UnknownUnit(s.to_string(), unit.to_string())),
    };
    let nanos = (value * nanos_per_unit).round();
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(ParseError::OutOfRange(s.to_string()));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Blocks for `duration`. A wakeup before the deadline only sleeps for
/// whatever is left, never the full duration again.
pub fn pause(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    debug!("(Sleeping {} ms)", as_millis_f64(duration));
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining < duration {
            debug!("(Sleeping {} ms more)", as_millis_f64(remaining));
        }
        thread::sleep(remaining);
    }
}
