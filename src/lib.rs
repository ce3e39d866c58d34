//! # telewatch
//!
//! Receiver core for a drone telemetry viewer.
//!
//! `telewatch` keeps long-lived network endpoints open in one of three modes
//! (UDP multicast, two direct TCP streams, or both), turns every chunk it
//! reads into a text message, and appends those messages in order to a
//! single consumer. Endpoints that fail are restarted by one supervisor per
//! endpoint, and a watchdog reports whether anything has been heard
//! recently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Receiver                              │
//! │  ┌────────────┐                                                  │
//! │  │ supervisor │──▶ transport::multicast ─┐                       │
//! │  │ (restart)  │──▶ transport::stream ────┼─▶ ┌──────────┐        │
//! │  │            │──▶ transport::stream ────┘   │ delivery │──▶ sink│
//! │  └────────────┘                              │ (decode, │        │
//! │                                              │ watchdog)│        │
//! │                                              └──────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`receiver`]**: start/stop entry points and session ownership
//! - **[`supervisor`]**: one restart state machine per logical endpoint
//! - **[`transport`]**: TCP stream attempts, the UDP listener and socket options
//! - **[`delivery`]**: the single consumer context that decodes and appends
//! - **[`decode`]**: JSON envelope decoding with a plain-text fallback
//! - **[`watchdog`]**: the liveness signal
//! - **[`sink`]**: the [`MessageSink`] trait and ready-made sinks
//! - **[`config`]**: the configuration snapshot and its loader
//!
//! ## Usage
//!
//! ```no_run
//! use telewatch::{ChannelSink, Receiver, ReceiverConfig, SinkEvent};
//!
//! # tokio_test::block_on(async {
//! let receiver = Receiver::new();
//! let (sink, mut messages) = ChannelSink::create();
//! receiver.start(&ReceiverConfig::direct("192.168.4.1", 4224, 4225), sink)?;
//!
//! while let Some(SinkEvent::Append(message)) = messages.recv().await {
//!     println!("[{}] {}", message.kind, message.content);
//! }
//!
//! receiver.stop().await;
//! # Ok::<(), telewatch::ReceiverError>(())
//! # });
//! ```

pub mod config;
pub mod decode;
pub mod delivery;
pub mod duration;
pub mod error;
pub mod receiver;
pub mod sink;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

pub use config::ReceiverConfig;
pub use decode::{decode, decode_at};
pub use error::{ReceiverError, Severity, TransportError};
pub use receiver::{EndpointStatus, Receiver, StartOutcome};
pub use sink::{ChannelSink, MessageLog, MessageSink, SinkEvent};
pub use supervisor::{EndpointPhase, RestartPolicy};
pub use transport::{ConnectionId, EndpointEvent};
pub use watchdog::{LivenessState, Watchdog};

// Re-export types for convenience
pub use telewatch_types::{
    ConnectionState, DecodedMessage, EndpointKind, Envelope, MessageKind, TransportMode,
};
