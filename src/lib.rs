pub mod config;
pub mod daemon;
pub mod delay;
pub mod error;
pub mod mac;
pub mod metrics;
pub mod model;
pub mod packet;
pub mod resolve;
pub mod secret;
pub mod send;

pub use error::{Error, HostError};
