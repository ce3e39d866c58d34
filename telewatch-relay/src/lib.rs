//! # telewatch-relay
//!
//! Field-side publisher for telewatch receivers.
//!
//! The relay reads text lines (typically a flight controller's serial
//! console), wraps each non-empty line into the flat JSON envelope the
//! receiver understands, and sends it to every configured output.
//!
//! ```json
//! {"type": "serial", "timestamp": "2024-05-01T12:00:00.123456", "data": "ARMED"}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//! use telewatch_relay::{Output, Relay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), telewatch_relay::RelayError> {
//!     let relay = Relay::builder()
//!         .output(Output::multicast(Ipv4Addr::new(224, 0, 0, 1), 6970))
//!         .message_type("serial")
//!         .build()
//!         .await?;
//!
//!     relay.publish_line("GPS 3D fix").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Outputs
//!
//! - **Multicast**: one datagram per envelope, TTL 1
//! - **Stream**: newline-delimited JSON to every connected TCP subscriber
//! - **Channel**: an mpsc channel, for embedding and tests

mod error;
mod output;
mod relay;

pub use error::RelayError;
pub use output::Output;
pub use relay::{Relay, RelayBuilder, DEFAULT_MESSAGE_TYPE};

// Re-export types for convenience
pub use telewatch_types::Envelope;
