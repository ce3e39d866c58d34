//! Multicast datagram listener.
//!
//! The listener binds one UDP socket and treats every remote peer that sends
//! to it as its own association: a [`Connection`] that becomes `Ready` on the
//! first datagram and is retired after a period of silence. Datagrams from
//! one peer are delivered in receipt order.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use telewatch_types::{ConnectionState, EndpointKind};
use tokio::net::UdpSocket;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::socket::bind_multicast;
use super::{AttemptOutcome, Connection, TransportContext};
use crate::config::ReceiverConfig;
use crate::error::is_suppressed;

/// Shortest interval between idle-association sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Where and how to bind the multicast listener.
#[derive(Debug, Clone)]
pub struct MulticastListener {
    pub port: u16,
    pub group: Ipv4Addr,
    pub interface: Ipv4Addr,
    pub read_buffer: usize,
    pub association_idle: Duration,
}

impl MulticastListener {
    pub fn from_config(config: &ReceiverConfig) -> Self {
        Self {
            port: config.multicast_port,
            group: config.multicast_group,
            interface: config.multicast_interface,
            read_buffer: config.read_buffer,
            association_idle: config.association_idle,
        }
    }

    /// `group:port` for logs and events.
    pub fn label(&self) -> String {
        format!("{}:{}", self.group, self.port)
    }

    /// Bind the listener socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> io::Result<UdpSocket> {
        let socket = bind_multicast(self.port, self.group, self.interface)?;
        UdpSocket::from_std(socket)
    }

    /// Run the listener on `conn` until stop or a listener-level failure.
    ///
    /// `socket` is used when already bound (the first attempt binds inside
    /// `Receiver::start` so port conflicts fail the start); otherwise the
    /// port is bound again here.
    pub async fn attempt(
        &self,
        socket: Option<UdpSocket>,
        conn: &mut Connection,
        cx: &mut TransportContext,
    ) -> AttemptOutcome {
        conn.transition(ConnectionState::Preparing);

        let socket = match socket {
            Some(socket) => socket,
            None => match self.bind() {
                Ok(socket) => socket,
                Err(e) => {
                    return AttemptOutcome::Failed {
                        error: e.into(),
                        reached_ready: false,
                    };
                }
            },
        };
        conn.transition(ConnectionState::Ready);

        let mut associations = Associations::new(self.association_idle);
        let mut sweep = tokio::time::interval((self.association_idle / 2).max(MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = vec![0u8; self.read_buffer];

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cx.stopped() => break AttemptOutcome::Stopped,
                _ = sweep.tick() => associations.retire_idle(Instant::now()),
                received = socket.recv_from(&mut buf) => match received {
                    Ok((0, _)) => continue,
                    Ok((n, peer)) => {
                        let chunk = associations.touch(peer, cx).chunk(&buf[..n]);
                        if !cx.deliver(chunk).await {
                            break AttemptOutcome::Stopped;
                        }
                    }
                    // ICMP port-unreachable from an earlier send surfaces as a reset on some platforms
                    Err(e) if is_suppressed(&e) || e.kind() == io::ErrorKind::ConnectionReset => {
                        debug!(error = %e, "Ignoring multicast receive error");
                        continue;
                    }
                    Err(e) => {
                        break AttemptOutcome::Failed { error: e.into(), reached_ready: true };
                    }
                },
            }
        };

        associations.close_all();
        outcome
    }
}

struct Association {
    conn: Connection,
    last_seen: Instant,
}

/// Per-peer connections of one listener attempt.
struct Associations {
    idle: Duration,
    peers: HashMap<SocketAddr, Association>,
}

impl Associations {
    fn new(idle: Duration) -> Self {
        Self {
            idle,
            peers: HashMap::new(),
        }
    }

    /// Record traffic from `peer`, opening an association on first contact.
    fn touch(&mut self, peer: SocketAddr, cx: &TransportContext) -> &Connection {
        let now = Instant::now();
        let association = self.peers.entry(peer).or_insert_with(|| {
            info!(%peer, "New multicast association");
            let mut conn = Connection::unsupervised(EndpointKind::Multicast, peer.to_string(), cx);
            conn.transition(ConnectionState::Preparing);
            conn.transition(ConnectionState::Ready);
            Association {
                conn,
                last_seen: now,
            }
        });
        association.last_seen = now;
        &association.conn
    }

    fn retire_idle(&mut self, now: Instant) {
        let idle = self.idle;
        self.peers.retain(|peer, association| {
            if now.duration_since(association.last_seen) < idle {
                return true;
            }
            debug!(%peer, "Retiring idle multicast association");
            association.conn.transition(ConnectionState::Cancelled);
            false
        });
    }

    fn close_all(&mut self) {
        for (_, mut association) in self.peers.drain() {
            association.conn.transition(ConnectionState::Cancelled);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.peers.len()
    }
}
