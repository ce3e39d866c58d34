//! Output backends for published envelopes.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use telewatch_types::Envelope;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// How long a subscriber may block a write before it is dropped.
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Destination for published envelopes.
#[derive(Debug)]
pub enum Output {
    /// Send each envelope as one UDP datagram to `group:port`.
    ///
    /// The datagram is the bare JSON object. `group` is normally a multicast
    /// group, but any IPv4 address works.
    Multicast { group: Ipv4Addr, port: u16 },

    /// Listen on an address and write every envelope to each connected
    /// subscriber as newline-terminated JSON.
    Stream(String),

    /// Send envelopes through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    Channel(mpsc::Sender<Envelope>),
}

impl Output {
    /// Create a multicast output.
    ///
    /// ```rust
    /// use std::net::Ipv4Addr;
    /// use telewatch_relay::Output;
    ///
    /// let output = Output::multicast(Ipv4Addr::new(224, 0, 0, 1), 6970);
    /// ```
    pub fn multicast(group: Ipv4Addr, port: u16) -> Self {
        Output::Multicast { group, port }
    }

    /// Create a stream output listening on `addr`.
    pub fn stream(addr: impl Into<String>) -> Self {
        Output::Stream(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Open the sockets behind this output.
    pub(crate) async fn open(self) -> Result<Emitter, RelayError> {
        match self {
            Output::Multicast { group, port } => {
                let socket = multicast_sender(group)
                    .map_err(|source| RelayError::Multicast { group, port, source })?;
                info!(%group, port, "Multicast output ready");
                Ok(Emitter::Multicast {
                    socket,
                    target: SocketAddrV4::new(group, port).into(),
                })
            }
            Output::Stream(addr) => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|source| RelayError::Listen {
                        addr: addr.clone(),
                        source,
                    })?;
                Ok(Emitter::Stream(StreamHub::start(listener)?))
            }
            Output::Channel(tx) => Ok(Emitter::Channel(tx)),
        }
    }
}

/// UDP sender with a TTL of one hop so telemetry stays on the local link.
fn multicast_sender(group: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if group.is_multicast() {
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(true)?;
    }
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// An opened output.
#[derive(Debug)]
pub(crate) enum Emitter {
    Multicast { socket: UdpSocket, target: SocketAddr },
    Stream(StreamHub),
    Channel(mpsc::Sender<Envelope>),
}

impl Emitter {
    /// Emit one envelope; `json` is its serialized form without a newline.
    pub(crate) async fn emit(&self, envelope: &Envelope, json: &str) -> io::Result<()> {
        match self {
            Emitter::Multicast { socket, target } => {
                let sent = socket.send_to(json.as_bytes(), target).await?;
                debug!(%target, bytes = sent, "Multicast sent");
            }
            Emitter::Stream(hub) => hub.broadcast(json).await,
            Emitter::Channel(tx) => tx.try_send(envelope.clone()).map_err(|e| {
                let kind = match &e {
                    TrySendError::Full(_) => io::ErrorKind::WouldBlock,
                    TrySendError::Closed(_) => io::ErrorKind::BrokenPipe,
                };
                io::Error::new(kind, format!("channel output: {}", e))
            })?,
        }
        Ok(())
    }

    pub(crate) fn stream_addr(&self) -> Option<SocketAddr> {
        match self {
            Emitter::Stream(hub) => Some(hub.local_addr),
            _ => None,
        }
    }

    pub(crate) async fn subscribers(&self) -> usize {
        match self {
            Emitter::Stream(hub) => hub.subscribers.lock().await.len(),
            _ => 0,
        }
    }
}

type Subscribers = Arc<Mutex<Vec<(SocketAddr, TcpStream)>>>;

/// Accepted stream subscribers of one listening socket.
#[derive(Debug)]
pub(crate) struct StreamHub {
    local_addr: SocketAddr,
    subscribers: Subscribers,
    accept: JoinHandle<()>,
}

impl StreamHub {
    fn start(listener: TcpListener) -> Result<Self, RelayError> {
        let local_addr = listener.local_addr().map_err(|source| RelayError::Listen {
            addr: "<bound listener>".to_string(),
            source,
        })?;
        let subscribers = Subscribers::default();
        let accept = tokio::spawn(accept_loop(listener, subscribers.clone()));
        info!(addr = %local_addr, "Stream output listening");
        Ok(Self {
            local_addr,
            subscribers,
            accept,
        })
    }

    /// Write `json` plus a newline to every subscriber, dropping any that
    /// fail or stall.
    async fn broadcast(&self, json: &str) {
        let mut line = Vec::with_capacity(json.len() + 1);
        line.extend_from_slice(json.as_bytes());
        line.push(b'\n');

        let mut subscribers = self.subscribers.lock().await;
        let mut kept = Vec::with_capacity(subscribers.len());
        for (peer, mut stream) in subscribers.drain(..) {
            match tokio::time::timeout(SUBSCRIBER_WRITE_TIMEOUT, stream.write_all(&line)).await {
                Ok(Ok(())) => kept.push((peer, stream)),
                Ok(Err(e)) => info!(%peer, error = %e, "Dropping stream subscriber"),
                Err(_) => warn!(%peer, "Dropping stalled stream subscriber"),
            }
        }
        *subscribers = kept;
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn accept_loop(listener: TcpListener, subscribers: Subscribers) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "Could not set nodelay");
                }
                info!(%peer, "Stream subscriber connected");
                subscribers.lock().await.push((peer, stream));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
