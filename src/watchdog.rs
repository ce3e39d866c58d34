//! Liveness tracking.
//!
//! The watchdog is plain state owned by the delivery task: every decoded
//! message records its arrival, and every tick re-evaluates whether the
//! receiver is still hearing from anyone. Keeping it on the delivery task
//! means the timestamp has a single writer.

use std::time::Duration;

use tokio::time::Instant;

/// Default tick period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Default silence after which the receiver counts as disconnected.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(5);

/// Snapshot of the liveness bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessState {
    pub last_received_at: Option<Instant>,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    threshold: Duration,
    state: LivenessState,
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: LivenessState::default(),
        }
    }

    /// Record a delivered message.
    pub fn record(&mut self, at: Instant) {
        // Chunks from different connections can be stamped slightly out of order
        if self.state.last_received_at.map_or(true, |last| at > last) {
            self.state.last_received_at = Some(at);
        }
        self.state.connected = true;
    }

    /// Re-evaluate liveness at `now` and return the new value.
    pub fn check(&mut self, now: Instant) -> bool {
        self.state.connected = match self.state.last_received_at {
            Some(last) => now.saturating_duration_since(last) < self.threshold,
            None => false,
        };
        self.state.connected
    }

    /// Forget everything, as if nothing was ever received.
    pub fn reset(&mut self) {
        self.state = LivenessState::default();
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
