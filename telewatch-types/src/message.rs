//! Wire envelope and decoded message types.

use std::fmt;

/// The category of a decoded message.
///
/// The receiver currently labels everything it decodes as [`MessageKind::Output`];
/// the other kinds exist so consumers can mix their own entries (for example
/// connection notices) into the same log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MessageKind {
    /// Vehicle telemetry.
    Telemetry,
    /// Status or serial console output.
    Status,
    /// Generic decoded output.
    #[default]
    Output,
    /// Messages produced locally by the viewer itself.
    System,
}

impl MessageKind {
    /// Returns the lowercase label used on the wire and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "telemetry",
            MessageKind::Status => "status",
            MessageKind::Output => "output",
            MessageKind::System => "system",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The flat JSON envelope published by the field relay.
///
/// ```json
/// {"type": "serial", "timestamp": "2024-05-01T12:00:00.000000", "data": "ARMED"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    /// Free-form message category chosen by the publisher.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub message_type: String,

    /// Publisher-side timestamp. Informational only.
    pub timestamp: String,

    /// The text payload.
    pub data: String,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(
        message_type: impl Into<String>,
        timestamp: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            timestamp: timestamp.into(),
            data: data.into(),
        }
    }
}

/// A normalized text message ready for display.
///
/// `timestamp_ms` is the capture time on the receiving side. The publisher's
/// own type and timestamp are kept in `source_type` / `source_timestamp` when
/// the payload arrived inside an [`Envelope`], but they never drive ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedMessage {
    /// Message category.
    pub kind: MessageKind,

    /// Unix timestamp in milliseconds when the bytes were received.
    pub timestamp_ms: u64,

    /// The text content.
    pub content: String,

    /// Envelope `type` field, if the message arrived as an envelope.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub source_type: Option<String>,

    /// Envelope `timestamp` field, if the message arrived as an envelope.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub source_timestamp: Option<String>,
}

impl DecodedMessage {
    /// Create a message stamped with the current time.
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self::with_timestamp(kind, content, current_timestamp_ms())
    }

    /// Create a message with a specific capture timestamp.
    pub fn with_timestamp(kind: MessageKind, content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            kind,
            timestamp_ms,
            content: content.into(),
            source_type: None,
            source_timestamp: None,
        }
    }

    /// Create an output message from a decoded envelope.
    pub fn from_envelope(envelope: Envelope, timestamp_ms: u64) -> Self {
        Self {
            kind: MessageKind::Output,
            timestamp_ms,
            content: envelope.data,
            source_type: Some(envelope.message_type),
            source_timestamp: Some(envelope.timestamp),
        }
    }

    /// Create a locally generated system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_envelope_keeps_capture_time() {
        let envelope = Envelope::new("telemetry", "2024-05-01T12:00:00", "alt=120m");
        let message = DecodedMessage::from_envelope(envelope, 42);

        assert_eq!(message.kind, MessageKind::Output);
        assert_eq!(message.timestamp_ms, 42);
        assert_eq!(message.content, "alt=120m");
        assert_eq!(message.source_type.as_deref(), Some("telemetry"));
        assert_eq!(message.source_timestamp.as_deref(), Some("2024-05-01T12:00:00"));
    }

    #[test]
    fn test_system_message() {
        let message = DecodedMessage::system("connected");
        assert_eq!(message.kind, MessageKind::System);
        assert!(message.timestamp_ms > 0);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(MessageKind::Telemetry.to_string(), "telemetry");
        assert_eq!(MessageKind::default(), MessageKind::Output);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_envelope_wire_field_names() {
        let json = r#"{"type":"serial","timestamp":"t","data":"hello"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.message_type, "serial");
        assert_eq!(serde_json::to_string(&envelope).unwrap(), json);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_envelope_requires_all_fields() {
        let json = r#"{"type":"signal_detected","freq":870000000,"timestamp":"t"}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }
}
