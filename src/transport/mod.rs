//! Network transports.
//!
//! This module owns everything that touches sockets:
//!
//! - [`stream`]: one TCP connection attempt and its read loop
//! - [`multicast`]: the UDP listener and its per-peer associations
//! - [`socket`]: socket option plumbing (reuse, keepalive, group membership)
//!
//! Transports never decode or deliver messages themselves. They push
//! [`RawChunk`]s into the delivery channel carried by a [`TransportContext`]
//! and report every lifecycle change of a [`Connection`] as an
//! [`EndpointEvent`].

pub mod multicast;
pub mod socket;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use telewatch_types::{current_timestamp_ms, ConnectionState, EndpointKind};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::supervisor::EndpointPhase;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bytes from one successful read.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub bytes: Vec<u8>,
    pub connection: ConnectionId,
    /// Monotonic arrival time, used for liveness.
    pub arrived_at: Instant,
    /// Wall-clock arrival time in Unix milliseconds, used as the message timestamp.
    pub arrived_at_ms: u64,
}

/// Work items for the delivery context.
#[derive(Debug)]
pub enum Inbound {
    Chunk(RawChunk),
    Clear,
}

/// A lifecycle transition of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEvent {
    pub endpoint: EndpointKind,
    pub connection: ConnectionId,
    /// Address or peer the connection talks to.
    pub label: String,
    pub state: ConnectionState,
}

/// Channels shared by every transport of one receiver session.
#[derive(Debug, Clone)]
pub struct TransportContext {
    chunks: mpsc::Sender<Inbound>,
    events: broadcast::Sender<EndpointEvent>,
    stop: watch::Receiver<bool>,
}

impl TransportContext {
    pub fn new(
        chunks: mpsc::Sender<Inbound>,
        events: broadcast::Sender<EndpointEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chunks,
            events,
            stop,
        }
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once stop has been requested (or the receiver is gone).
    pub async fn stopped(&mut self) {
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }

    /// Hand a chunk to the delivery context.
    ///
    /// Waits while the delivery queue is full. Returns `false` if the receiver
    /// stopped before the chunk was accepted; the caller must not re-arm.
    pub async fn deliver(&mut self, chunk: RawChunk) -> bool {
        if self.is_stopped() {
            return false;
        }
        let chunks = self.chunks.clone();
        tokio::select! {
            biased;
            _ = self.stopped() => false,
            sent = chunks.send(Inbound::Chunk(chunk)) => sent.is_ok(),
        }
    }

    /// Sleep for `delay` unless stopped first. Returns `false` if stopped.
    pub async fn sleep(&mut self, delay: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stopped() => false,
            _ = tokio::time::sleep(delay) => !self.is_stopped(),
        }
    }
}

/// One connection object and its forward-only state.
///
/// A connection never re-enters `Ready`; restarting an endpoint creates a new
/// `Connection`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: EndpointKind,
    label: String,
    state: ConnectionState,
    events: broadcast::Sender<EndpointEvent>,
    phase: Option<Arc<watch::Sender<EndpointPhase>>>,
}

impl Connection {
    /// A connection driven by an endpoint supervisor; reaching `Ready` marks
    /// the endpoint ready.
    pub fn supervised(
        endpoint: EndpointKind,
        label: impl Into<String>,
        cx: &TransportContext,
        phase: Arc<watch::Sender<EndpointPhase>>,
    ) -> Self {
        Self {
            phase: Some(phase),
            ..Self::unsupervised(endpoint, label, cx)
        }
    }

    /// A connection with no supervisor of its own (multicast associations).
    pub fn unsupervised(
        endpoint: EndpointKind,
        label: impl Into<String>,
        cx: &TransportContext,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            endpoint,
            label: label.into(),
            state: ConnectionState::Idle,
            events: cx.events.clone(),
            phase: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// Backward transitions are ignored and reported as `false`.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(&next) {
            debug!(
                endpoint = %self.endpoint,
                connection = %self.id,
                from = %self.state,
                to = %next,
                "Ignoring backward connection transition"
            );
            return false;
        }

        match &next {
            ConnectionState::Ready => {
                info!(endpoint = %self.endpoint, connection = %self.id, peer = %self.label, "Connection ready");
            }
            ConnectionState::Waiting(e) => {
                warn!(endpoint = %self.endpoint, connection = %self.id, peer = %self.label, error = %e, "Connection waiting")
            }
            ConnectionState::Failed(e) => {
                warn!(endpoint = %self.endpoint, connection = %self.id, peer = %self.label, error = %e, "Connection failed")
            }
            other => {
                debug!(endpoint = %self.endpoint, connection = %self.id, peer = %self.label, state = %other, "Connection state")
            }
        }

        let ready = next == ConnectionState::Ready;
        self.state = next.clone();
        let event = EndpointEvent {
            endpoint: self.endpoint,
            connection: self.id,
            label: self.label.clone(),
            state: next,
        };
        // No subscribers is fine
        let _ = self.events.send(event);

        // Published after the event so phase watchers find it already sent
        if ready {
            if let Some(phase) = &self.phase {
                phase.send_replace(EndpointPhase::Ready);
            }
        }
        true
    }

    /// Stamp bytes read from this connection.
    pub fn chunk(&self, bytes: &[u8]) -> RawChunk {
        RawChunk {
            bytes: bytes.to_vec(),
            connection: self.id,
            arrived_at: Instant::now(),
            arrived_at_ms: current_timestamp_ms(),
        }
    }
}

/// How one connection attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Stop was requested; the connection should be marked cancelled.
    Stopped,
    /// The attempt ended with an error.
    Failed {
        error: TransportError,
        /// Whether the connection reached `Ready` before failing.
        reached_ready: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (TransportContext, broadcast::Receiver<EndpointEvent>, watch::Sender<bool>) {
        let (chunks, _rx) = mpsc::channel(8);
        let (events, events_rx) = broadcast::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        (TransportContext::new(chunks, events, stop_rx), events_rx, stop_tx)
    }

    #[tokio::test]
    async fn test_transitions_are_published_in_order() {
        let (cx, mut events, _stop) = context();
        let mut conn = Connection::unsupervised(EndpointKind::Status, "localhost:4225", &cx);

        assert!(conn.transition(ConnectionState::Preparing));
        assert!(conn.transition(ConnectionState::Ready));
        assert!(conn.transition(ConnectionState::Cancelled));

        let states: Vec<_> = (0..3).map(|_| events.try_recv().unwrap().state).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Preparing,
                ConnectionState::Ready,
                ConnectionState::Cancelled
            ]
        );
    }

    #[tokio::test]
    async fn test_backward_transition_is_ignored() {
        let (cx, mut events, _stop) = context();
        let mut conn = Connection::unsupervised(EndpointKind::Telemetry, "localhost:4224", &cx);

        conn.transition(ConnectionState::Preparing);
        conn.transition(ConnectionState::Failed("refused".to_string()));
        assert!(!conn.transition(ConnectionState::Ready));
        assert!(matches!(conn.state(), ConnectionState::Failed(_)));

        assert_eq!(events.try_recv().unwrap().state, ConnectionState::Preparing);
        assert!(matches!(events.try_recv().unwrap().state, ConnectionState::Failed(_)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_supervised_ready_marks_phase() {
        let (cx, _events, _stop) = context();
        let (phase_tx, phase_rx) = watch::channel(EndpointPhase::Connecting);
        let mut conn =
            Connection::supervised(EndpointKind::Status, "localhost:4225", &cx, Arc::new(phase_tx));

        conn.transition(ConnectionState::Preparing);
        assert_eq!(*phase_rx.borrow(), EndpointPhase::Connecting);
        conn.transition(ConnectionState::Ready);
        assert_eq!(*phase_rx.borrow(), EndpointPhase::Ready);
    }

    #[tokio::test]
    async fn test_deliver_refuses_after_stop() {
        let (mut cx, _events, stop) = context();
        let conn = Connection::unsupervised(EndpointKind::Multicast, "10.0.0.2:5000", &cx);

        stop.send_replace(true);
        assert!(!cx.deliver(conn.chunk(b"late")).await);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }
}
