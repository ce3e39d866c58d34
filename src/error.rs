//! Error types for the receiver.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by [`Receiver::start`](crate::Receiver::start) and
/// configuration loading.
///
/// Transport problems after a successful start are never returned here; they
/// are recovered by the endpoint supervisors and only show up through the
/// connection events and the liveness signal.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The configuration snapshot is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The multicast listener could not bind its port.
    #[error("Failed to bind multicast listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// `start()` was called outside a tokio runtime.
    #[error("No tokio runtime available to drive the receiver")]
    NoRuntime,
}

/// How a transport error should be handled by the restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected to clear up on its own; the endpoint waits and retries.
    Transient,
    /// The endpoint cannot work as configured.
    Terminal,
}

/// An error raised by a single connection attempt or read loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The stream connect did not complete in time.
    #[error("Connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The peer finished the stream and no data remains.
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Any socket-level failure.
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify the error for the restart policy.
    pub fn severity(&self) -> Severity {
        match self {
            TransportError::ConnectTimeout { .. } | TransportError::PeerClosed => {
                Severity::Transient
            }
            TransportError::Io(e) => classify(e),
        }
    }
}

/// Classify an I/O error as transient or terminal.
///
/// Anything the OS reports without a stable kind (unreachable host or
/// network, name resolution failures) is treated as transient.
pub fn classify(err: &io::Error) -> Severity {
    match err.kind() {
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::Unsupported => Severity::Terminal,
        _ => Severity::Transient,
    }
}

/// Errors that mean "the operation was cancelled and should simply be re-armed".
///
/// These never produce a `Waiting` transition.
pub fn is_suppressed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
