//! The receiver coordinator.
//!
//! [`Receiver`] owns one session at a time: the supervised endpoints for the
//! configured mode, the delivery task, and the channels between them.
//!
//! ```text
//!  Supervisor(multicast) ──┐
//!  Supervisor(telemetry) ──┼──► mpsc<Inbound> ──► Delivery ──► sink
//!  Supervisor(status)    ──┘                         │
//!                                                    └──► connected (watch)
//!  every Connection ──► broadcast<EndpointEvent>
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use telewatch_types::EndpointKind;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::delivery::{Delivery, INBOUND_CAPACITY};
use crate::error::ReceiverError;
use crate::sink::MessageSink;
use crate::supervisor::{Endpoint, EndpointHandle, EndpointPhase, RestartPolicy, Supervisor};
use crate::transport::multicast::MulticastListener;
use crate::transport::stream::StreamEndpoint;
use crate::transport::{EndpointEvent, Inbound, TransportContext};
use crate::watchdog::Watchdog;

/// Capacity of the connection event broadcast.
const EVENT_CAPACITY: usize = 256;

/// Result of a successful [`Receiver::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was started.
    Started,
    /// A session was already running; nothing changed and the sink was dropped.
    AlreadyRunning,
}

/// Point-in-time view of one supervised endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub kind: EndpointKind,
    pub label: String,
    pub phase: EndpointPhase,
}

struct Running<S> {
    stop: watch::Sender<bool>,
    inbound: mpsc::Sender<Inbound>,
    endpoints: Vec<EndpointHandle>,
    delivery: JoinHandle<S>,
}

/// Receives telemetry over multicast and/or direct streams and feeds one sink.
///
/// # Example
///
/// ```no_run
/// use telewatch::{MessageLog, Receiver, ReceiverConfig};
///
/// # tokio_test::block_on(async {
/// let receiver = Receiver::new();
/// receiver.start(&ReceiverConfig::multicast(6969), MessageLog::default())?;
///
/// let mut connected = receiver.connected();
/// connected.wait_for(|c| *c).await.ok();
///
/// let log = receiver.stop().await;
/// # Ok::<(), telewatch::ReceiverError>(())
/// # });
/// ```
///
/// Dropping a running receiver stops its tasks as well, but the sink is lost.
pub struct Receiver<S: MessageSink> {
    running: Mutex<Option<Running<S>>>,
    connected: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<EndpointEvent>,
}

impl<S: MessageSink> Default for Receiver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MessageSink> std::fmt::Debug for Receiver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<S: MessageSink> Receiver<S> {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            running: Mutex::new(None),
            connected: Arc::new(connected),
            events,
        }
    }

    /// Start a session with `config`, delivering into `sink`.
    ///
    /// Must be called from within a tokio runtime. Calling it while a session
    /// is running does nothing and returns [`StartOutcome::AlreadyRunning`].
    /// The multicast port is bound before anything is spawned, so a port
    /// conflict fails the call and leaves the receiver idle.
    pub fn start(&self, config: &ReceiverConfig, sink: S) -> Result<StartOutcome, ReceiverError> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Receiver already running, ignoring start");
            return Ok(StartOutcome::AlreadyRunning);
        }

        config.validate()?;
        Handle::try_current().map_err(|_| ReceiverError::NoRuntime)?;

        let listener = if config.mode.uses_multicast() {
            let listener = MulticastListener::from_config(config);
            let socket = listener.bind().map_err(|source| ReceiverError::Bind {
                port: listener.port,
                source,
            })?;
            Some((listener, socket))
        } else {
            None
        };

        let (inbound, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (stop, stop_rx) = watch::channel(false);
        let cx = TransportContext::new(inbound.clone(), self.events.clone(), stop_rx.clone());

        let delivery = Delivery::new(
            inbound_rx,
            stop_rx,
            self.connected.clone(),
            Watchdog::new(config.liveness_threshold),
            config.watchdog_period,
            sink,
        );
        let delivery = tokio::spawn(delivery.run());

        let mut endpoints = Vec::new();
        if let Some((listener, socket)) = listener {
            let endpoint = Endpoint::Multicast {
                listener,
                bound: Some(socket),
            };
            endpoints.push(Supervisor::spawn(
                endpoint,
                RestartPolicy::listener(config),
                cx.clone(),
            ));
        }
        if config.mode.uses_streams() {
            for stream in [StreamEndpoint::telemetry(config), StreamEndpoint::status(config)] {
                endpoints.push(Supervisor::spawn(
                    Endpoint::Stream(stream),
                    RestartPolicy::stream(config),
                    cx.clone(),
                ));
            }
        }

        info!(mode = %config.mode, endpoints = endpoints.len(), "Receiver started");
        *running = Some(Running {
            stop,
            inbound,
            endpoints,
            delivery,
        });
        Ok(StartOutcome::Started)
    }

    /// Stop the running session and return its sink.
    ///
    /// Returns `None` if nothing was running. When this returns, every
    /// endpoint is closed and the sink will not be touched again.
    pub async fn stop(&self) -> Option<S> {
        let running = self.running.lock().take()?;
        let Running {
            stop,
            inbound,
            endpoints,
            delivery,
        } = running;
        drop(inbound);
        stop.send_replace(true);

        for endpoint in endpoints {
            if let Err(e) = endpoint.task.await {
                warn!(endpoint = %endpoint.kind, error = %e, "Endpoint task ended abnormally");
            }
        }

        match delivery.await {
            Ok(sink) => {
                info!("Receiver stopped");
                Some(sink)
            }
            Err(e) => {
                warn!(error = %e, "Delivery task ended abnormally");
                None
            }
        }
    }

    /// Clear the sink from the delivery context.
    ///
    /// Ordered with respect to messages already queued. Does nothing when
    /// idle.
    pub async fn clear_messages(&self) {
        let inbound = match self.running.lock().as_ref() {
            Some(running) => running.inbound.clone(),
            None => return,
        };
        let _ = inbound.send(Inbound::Clear).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Watch the liveness signal.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Subscribe to connection state transitions of every endpoint.
    pub fn subscribe_states(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    /// Current phase of every supervised endpoint, empty when idle.
    pub fn endpoints(&self) -> Vec<EndpointStatus> {
        match self.running.lock().as_ref() {
            Some(running) => running
                .endpoints
                .iter()
                .map(|handle| EndpointStatus {
                    kind: handle.kind,
                    label: handle.label.clone(),
                    phase: *handle.phase.borrow(),
                })
                .collect(),
            None => Vec::new(),
        }
    }
}
