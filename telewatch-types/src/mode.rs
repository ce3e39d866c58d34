//! Transport mode selection.

use std::fmt;
use std::str::FromStr;

/// Which transports the receiver opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TransportMode {
    /// One UDP listener on the multicast port.
    #[default]
    Multicast,
    /// Two TCP streams: telemetry and status.
    #[cfg_attr(feature = "serde", serde(alias = "direct", alias = "zmq"))]
    DirectStream,
    /// The multicast listener and both streams.
    Both,
}

impl TransportMode {
    /// Whether the multicast listener is opened in this mode.
    pub fn uses_multicast(&self) -> bool {
        matches!(self, TransportMode::Multicast | TransportMode::Both)
    }

    /// Whether the telemetry and status streams are opened in this mode.
    pub fn uses_streams(&self) -> bool {
        matches!(self, TransportMode::DirectStream | TransportMode::Both)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportMode::Multicast => "multicast",
            TransportMode::DirectStream => "direct-stream",
            TransportMode::Both => "both",
        })
    }
}

/// Error returned when parsing an unknown transport mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown transport mode '{}' (expected multicast, direct-stream or both)",
            self.0
        )
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for TransportMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multicast" => Ok(TransportMode::Multicast),
            "direct-stream" | "direct" | "zmq" => Ok(TransportMode::DirectStream),
            "both" => Ok(TransportMode::Both),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        assert!(TransportMode::Multicast.uses_multicast());
        assert!(!TransportMode::Multicast.uses_streams());
        assert!(TransportMode::DirectStream.uses_streams());
        assert!(!TransportMode::DirectStream.uses_multicast());
        assert!(TransportMode::Both.uses_multicast() && TransportMode::Both.uses_streams());
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("ZMQ".parse::<TransportMode>().unwrap(), TransportMode::DirectStream);
        assert_eq!("direct".parse::<TransportMode>().unwrap(), TransportMode::DirectStream);
        assert_eq!(" both ".parse::<TransportMode>().unwrap(), TransportMode::Both);
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_kebab_case() {
        let mode: TransportMode = serde_json::from_str(r#""direct-stream""#).unwrap();
        assert_eq!(mode, TransportMode::DirectStream);
        let mode: TransportMode = serde_json::from_str(r#""zmq""#).unwrap();
        assert_eq!(mode, TransportMode::DirectStream);
    }
}
