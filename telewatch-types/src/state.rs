//! Connection lifecycle and endpoint identity.

use std::fmt;

/// Lifecycle of a single transport connection.
///
/// States only move forward:
///
/// ```text
/// Idle ─▶ Preparing ─▶ Ready ─▶ Waiting ─▶ Failed ─▶ Cancelled
///             │                    ▲          ▲
///             └────────────────────┴──────────┘
/// ```
///
/// A connection never returns to `Ready` once it has left it. Recovering from
/// `Waiting` or `Failed` means opening a new connection object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "state", content = "error", rename_all = "lowercase"))]
pub enum ConnectionState {
    /// Created but not opened.
    #[default]
    Idle,
    /// Connecting or binding.
    Preparing,
    /// Connected (stream) or bound (datagram) and reading.
    Ready,
    /// A transient error occurred; a restart is pending.
    Waiting(String),
    /// A terminal error occurred; the connection is closed.
    Failed(String),
    /// Closed on request.
    Cancelled,
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Preparing => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Waiting(_) => 3,
            ConnectionState::Failed(_) => 4,
            ConnectionState::Cancelled => 5,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        next.rank() > self.rank()
    }

    /// Returns true once the connection can no longer deliver data.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ConnectionState::Waiting(_) | ConnectionState::Failed(_) | ConnectionState::Cancelled
        )
    }

    /// Returns the error attached to `Waiting` or `Failed`.
    pub fn error(&self) -> Option<&str> {
        match self {
            ConnectionState::Waiting(e) | ConnectionState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Preparing => "preparing",
            ConnectionState::Ready => "ready",
            ConnectionState::Waiting(_) => "waiting",
            ConnectionState::Failed(_) => "failed",
            ConnectionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error() {
            Some(e) => write!(f, "{} ({})", self.label(), e),
            None => f.write_str(self.label()),
        }
    }
}

/// The logical endpoint a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EndpointKind {
    /// Direct telemetry stream.
    Telemetry,
    /// Direct status stream.
    Status,
    /// Multicast datagram listener and its associations.
    Multicast,
}

impl EndpointKind {
    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            EndpointKind::Telemetry => "telemetry",
            EndpointKind::Status => "status",
            EndpointKind::Multicast => "multicast",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let waiting = ConnectionState::Waiting("refused".to_string());
        let failed = ConnectionState::Failed("refused".to_string());

        assert!(ConnectionState::Idle.can_transition_to(&ConnectionState::Preparing));
        assert!(ConnectionState::Preparing.can_transition_to(&ConnectionState::Ready));
        assert!(ConnectionState::Preparing.can_transition_to(&waiting));
        assert!(ConnectionState::Ready.can_transition_to(&failed));
        assert!(waiting.can_transition_to(&failed));
        assert!(failed.can_transition_to(&ConnectionState::Cancelled));
    }

    #[test]
    fn test_ready_is_not_reentered() {
        let waiting = ConnectionState::Waiting("reset".to_string());

        assert!(!ConnectionState::Ready.can_transition_to(&ConnectionState::Ready));
        assert!(!waiting.can_transition_to(&ConnectionState::Ready));
        assert!(!ConnectionState::Cancelled.can_transition_to(&ConnectionState::Preparing));
    }

    #[test]
    fn test_display_includes_error() {
        let state = ConnectionState::Waiting("connection refused".to_string());
        assert_eq!(state.to_string(), "waiting (connection refused)");
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
        assert!(state.is_closed());
        assert!(!ConnectionState::Ready.is_closed());
    }
}
