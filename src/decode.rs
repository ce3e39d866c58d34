//! Raw chunk decoding.
//!
//! Every chunk read from a connection is turned into at most one
//! [`DecodedMessage`]:
//!
//! 1. A strict JSON [`Envelope`] (`type`, `timestamp`, `data`, all strings)
//!    becomes a message whose content is `data`.
//! 2. Anything else is read as UTF-8 text and trimmed; non-empty text becomes
//!    a message verbatim, whitespace-only chunks (keepalives) are dropped.
//! 3. Bytes that are neither are dropped.
//!
//! Decoding never fails from the caller's point of view.

use telewatch_types::{current_timestamp_ms, DecodedMessage, Envelope, MessageKind};
use tracing::debug;

/// Decode a chunk, stamping the result with the current time.
pub fn decode(bytes: &[u8]) -> Option<DecodedMessage> {
    decode_at(bytes, current_timestamp_ms())
}

/// Decode a chunk captured at `timestamp_ms`.
///
/// The envelope's own timestamp is kept as `source_timestamp` but the
/// message is always stamped with the capture time.
pub fn decode_at(bytes: &[u8], timestamp_ms: u64) -> Option<DecodedMessage> {
    if let Ok(envelope) = serde_json::from_slice::<Envelope>(bytes) {
        return Some(DecodedMessage::from_envelope(envelope, timestamp_ms));
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(DecodedMessage::with_timestamp(
                    MessageKind::Output,
                    text,
                    timestamp_ms,
                ))
            }
        }
        Err(e) => {
            debug!(len = bytes.len(), error = %e, "Dropping chunk that is not valid UTF-8");
            None
        }
    }
}
