//! Relay errors.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors raised while setting up or running a [`Relay`](crate::Relay).
///
/// Failures of a single output while publishing are logged and skipped;
/// only setup and input problems are returned.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay needs at least one output")]
    NoOutputs,

    #[error("Failed to open multicast output {group}:{port}: {source}")]
    Multicast {
        group: Ipv4Addr,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to listen for stream subscribers on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to read input: {0}")]
    Input(#[source] io::Error),
}
