//! # telewatch-types
//!
//! Core types shared by the telewatch receiver and the field relay. This crate
//! defines the wire envelope published by the relay, the normalized message
//! handed to the presentation layer, and the connection lifecycle reported by
//! every transport.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable `serde` to decode the JSON envelope and
//!   to persist or forward decoded messages
//! - **Monotonic lifecycles**: [`ConnectionState`] knows which transitions are legal
//!
//! ## Features
//!
//! - `serde`: JSON serialization of envelopes, messages and configuration enums
//!
//! ## Example
//!
//! ```rust
//! use telewatch_types::{ConnectionState, DecodedMessage, MessageKind};
//!
//! let message = DecodedMessage::with_timestamp(MessageKind::Output, "GPS fix: 3D", 1703160000000);
//! assert_eq!(message.content, "GPS fix: 3D");
//!
//! let state = ConnectionState::Preparing;
//! assert!(state.can_transition_to(&ConnectionState::Ready));
//! assert!(!ConnectionState::Cancelled.can_transition_to(&ConnectionState::Ready));
//! ```

mod message;
mod mode;
mod state;

pub use message::*;
pub use mode::*;
pub use state::*;
