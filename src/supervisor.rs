//! Endpoint supervision.
//!
//! Each logical endpoint (the multicast listener, the telemetry stream, the
//! status stream) is driven by exactly one [`Supervisor`]. The supervisor is
//! the only place that decides whether to retry: transports report how an
//! attempt ended and the [`RestartPolicy`] turns that into the next step.
//! Every attempt uses a fresh [`Connection`], so a connection that reached
//! `Waiting` or `Failed` is never brought back to `Ready`.
//!
//! ```text
//!   Connecting ──► Ready
//!       ▲            │ error
//!       │            ▼
//!       └──────── Backoff(n) ──► Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use telewatch_types::{ConnectionState, EndpointKind};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::error::Severity;
use crate::transport::multicast::MulticastListener;
use crate::transport::stream::StreamEndpoint;
use crate::transport::{AttemptOutcome, Connection, TransportContext};

/// Where a supervised endpoint is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointPhase {
    /// An attempt is in flight but has not reached `Ready`.
    Connecting,
    /// The current connection is ready.
    Ready,
    /// Waiting out the restart delay after the `attempt`-th consecutive failure.
    Backoff { attempt: u32 },
    /// Stopped on request or given up.
    Stopped,
}

impl EndpointPhase {
    pub fn label(&self) -> &'static str {
        match self {
            EndpointPhase::Connecting => "connecting",
            EndpointPhase::Ready => "ready",
            EndpointPhase::Backoff { .. } => "backoff",
            EndpointPhase::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for EndpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointPhase::Backoff { attempt } => write!(f, "backoff #{}", attempt),
            other => f.write_str(other.label()),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Mark the connection `Waiting` and try again after the delay.
    Retry,
    /// Mark the connection `Failed` and try again after the delay.
    Restart,
    /// Mark the connection `Failed` and stop supervising.
    GiveUp,
}

/// Restart rules for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Fixed delay before the next attempt.
    pub delay: Duration,
    /// Consecutive transient failures tolerated before giving up.
    /// `None` retries forever.
    pub max_transient_retries: Option<u32>,
    /// Whether a terminal failure (or exhausted retries) restarts the
    /// endpoint instead of giving up.
    pub restart_after_failure: bool,
}

impl RestartPolicy {
    /// Direct streams retry transient errors a bounded number of times and
    /// never restart after a terminal failure.
    pub fn stream(config: &ReceiverConfig) -> Self {
        Self {
            delay: config.restart_delay,
            max_transient_retries: Some(config.max_transient_retries),
            restart_after_failure: false,
        }
    }

    /// The multicast listener always comes back.
    pub fn listener(config: &ReceiverConfig) -> Self {
        Self {
            delay: config.restart_delay,
            max_transient_retries: None,
            restart_after_failure: true,
        }
    }

    /// Decide the next step after the `consecutive_failures`-th failure in a row.
    pub fn decide(&self, severity: Severity, consecutive_failures: u32) -> Decision {
        let exhausted = match severity {
            Severity::Terminal => true,
            Severity::Transient => self
                .max_transient_retries
                .is_some_and(|max| consecutive_failures > max),
        };

        match (exhausted, self.restart_after_failure) {
            (false, _) => Decision::Retry,
            (true, true) => Decision::Restart,
            (true, false) => Decision::GiveUp,
        }
    }
}

/// The transport behind a supervised endpoint.
#[derive(Debug)]
pub enum Endpoint {
    Stream(StreamEndpoint),
    Multicast {
        listener: MulticastListener,
        /// Socket bound ahead of time, consumed by the first attempt.
        bound: Option<UdpSocket>,
    },
}

impl Endpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Stream(stream) => stream.kind,
            Endpoint::Multicast { .. } => EndpointKind::Multicast,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Endpoint::Stream(stream) => stream.addr.clone(),
            Endpoint::Multicast { listener, .. } => listener.label(),
        }
    }

    async fn attempt(&mut self, conn: &mut Connection, cx: &mut TransportContext) -> AttemptOutcome {
        match self {
            Endpoint::Stream(stream) => stream.attempt(conn, cx).await,
            Endpoint::Multicast { listener, bound } => {
                listener.attempt(bound.take(), conn, cx).await
            }
        }
    }
}

/// A running supervisor as seen by the receiver.
#[derive(Debug)]
pub struct EndpointHandle {
    pub kind: EndpointKind,
    pub label: String,
    pub phase: watch::Receiver<EndpointPhase>,
    pub task: JoinHandle<()>,
}

/// Drives one endpoint through repeated attempts until stop or give-up.
pub struct Supervisor {
    endpoint: Endpoint,
    policy: RestartPolicy,
    cx: TransportContext,
    phase: Arc<watch::Sender<EndpointPhase>>,
}

impl Supervisor {
    pub fn new(
        endpoint: Endpoint,
        policy: RestartPolicy,
        cx: TransportContext,
    ) -> (Self, watch::Receiver<EndpointPhase>) {
        let (phase, phase_rx) = watch::channel(EndpointPhase::Connecting);
        let supervisor = Self {
            endpoint,
            policy,
            cx,
            phase: Arc::new(phase),
        };
        (supervisor, phase_rx)
    }

    /// Spawn the supervisor on the current runtime.
    pub fn spawn(endpoint: Endpoint, policy: RestartPolicy, cx: TransportContext) -> EndpointHandle {
        let kind = endpoint.kind();
        let label = endpoint.label();
        let (supervisor, phase) = Self::new(endpoint, policy, cx);
        EndpointHandle {
            kind,
            label,
            phase,
            task: tokio::spawn(supervisor.run()),
        }
    }

    pub async fn run(mut self) {
        let kind = self.endpoint.kind();
        let label = self.endpoint.label();
        let mut failures: u32 = 0;
        info!(endpoint = %kind, addr = %label, "Starting endpoint");

        loop {
            self.phase.send_replace(EndpointPhase::Connecting);
            let mut conn = Connection::supervised(kind, label.clone(), &self.cx, self.phase.clone());

            let (error, reached_ready) = match self.endpoint.attempt(&mut conn, &mut self.cx).await {
                AttemptOutcome::Stopped => {
                    conn.transition(ConnectionState::Cancelled);
                    break;
                }
                AttemptOutcome::Failed { error, reached_ready } => (error, reached_ready),
            };

            if self.cx.is_stopped() {
                conn.transition(ConnectionState::Cancelled);
                break;
            }

            if reached_ready {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            let reason = error.to_string();
            match self.policy.decide(error.severity(), failures) {
                Decision::Retry => {
                    conn.transition(ConnectionState::Waiting(reason));
                }
                Decision::Restart => {
                    conn.transition(ConnectionState::Failed(reason));
                }
                Decision::GiveUp => {
                    conn.transition(ConnectionState::Failed(reason));
                    warn!(endpoint = %kind, addr = %label, failures, "Giving up on endpoint");
                    break;
                }
            }

            self.phase
                .send_replace(EndpointPhase::Backoff { attempt: failures });
            debug!(endpoint = %kind, delay = ?self.policy.delay, attempt = failures, "Restarting after delay");
            if !self.cx.sleep(self.policy.delay).await {
                conn.transition(ConnectionState::Cancelled);
                break;
            }
        }

        self.phase.send_replace(EndpointPhase::Stopped);
        debug!(endpoint = %kind, addr = %label, "Endpoint stopped");
    }
}
