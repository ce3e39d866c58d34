//! Direct TCP stream endpoints.
//!
//! A [`StreamEndpoint`] performs one connection attempt at a time: connect
//! with a timeout, enable keepalive, then read chunks of up to
//! `read_buffer` bytes until the peer finishes, an error occurs, or stop is
//! requested. Each successful read is delivered as one chunk and the read is
//! re-armed immediately. Deciding what happens after a failed attempt is the
//! supervisor's job.

use std::time::Duration;

use telewatch_types::{ConnectionState, EndpointKind};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::socket::configure_stream;
use super::{AttemptOutcome, Connection, TransportContext};
use crate::config::ReceiverConfig;
use crate::error::{is_suppressed, TransportError};

/// Where and how to open one direct stream.
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    pub kind: EndpointKind,
    pub addr: String,
    pub connect_timeout: Duration,
    pub keepalive: Duration,
    pub read_buffer: usize,
}

impl StreamEndpoint {
    /// The telemetry stream described by `config`.
    pub fn telemetry(config: &ReceiverConfig) -> Self {
        Self::from_config(EndpointKind::Telemetry, config.telemetry_addr(), config)
    }

    /// The status stream described by `config`.
    pub fn status(config: &ReceiverConfig) -> Self {
        Self::from_config(EndpointKind::Status, config.status_addr(), config)
    }

    fn from_config(kind: EndpointKind, addr: String, config: &ReceiverConfig) -> Self {
        Self {
            kind,
            addr,
            connect_timeout: config.connect_timeout,
            keepalive: config.keepalive,
            read_buffer: config.read_buffer,
        }
    }

    /// Run one connection attempt on `conn`.
    ///
    /// Moves `conn` through `Preparing` and `Ready`; the closing transition is
    /// left to the caller.
    pub async fn attempt(&self, conn: &mut Connection, cx: &mut TransportContext) -> AttemptOutcome {
        conn.transition(ConnectionState::Preparing);

        let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr));
        let stream = tokio::select! {
            biased;
            _ = cx.stopped() => return AttemptOutcome::Stopped,
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return AttemptOutcome::Failed { error: e.into(), reached_ready: false };
                }
                Err(_) => {
                    let error = TransportError::ConnectTimeout {
                        addr: self.addr.clone(),
                        timeout: self.connect_timeout,
                    };
                    return AttemptOutcome::Failed { error, reached_ready: false };
                }
            },
        };

        if let Err(e) = configure_stream(&stream, self.keepalive) {
            warn!(endpoint = %self.kind, addr = %self.addr, error = %e, "Could not enable keepalive");
        }
        conn.transition(ConnectionState::Ready);

        self.read_loop(stream, conn, cx).await
    }

    async fn read_loop(
        &self,
        mut stream: TcpStream,
        conn: &mut Connection,
        cx: &mut TransportContext,
    ) -> AttemptOutcome {
        let mut buf = vec![0u8; self.read_buffer];

        loop {
            let read = tokio::select! {
                biased;
                _ = cx.stopped() => return AttemptOutcome::Stopped,
                read = stream.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!(endpoint = %self.kind, connection = %conn.id(), "Peer finished the stream");
                    return AttemptOutcome::Failed {
                        error: TransportError::PeerClosed,
                        reached_ready: true,
                    };
                }
                Ok(n) => {
                    if !cx.deliver(conn.chunk(&buf[..n])).await {
                        return AttemptOutcome::Stopped;
                    }
                }
                Err(e) if is_suppressed(&e) => continue,
                Err(e) => {
                    return AttemptOutcome::Failed {
                        error: e.into(),
                        reached_ready: true,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{EndpointEvent, Inbound};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::{broadcast, mpsc, watch};

    struct Harness {
        cx: TransportContext,
        chunks: mpsc::Receiver<Inbound>,
        events: broadcast::Receiver<EndpointEvent>,
        stop: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let (chunks_tx, chunks) = mpsc::channel(16);
        let (events_tx, events) = broadcast::channel(16);
        let (stop, stop_rx) = watch::channel(false);
        Harness {
            cx: TransportContext::new(chunks_tx, events_tx, stop_rx),
            chunks,
            events,
            stop,
        }
    }

    fn endpoint(addr: String) -> StreamEndpoint {
        StreamEndpoint {
            kind: EndpointKind::Status,
            addr,
            connect_timeout: Duration::from_secs(2),
            keepalive: Duration::from_secs(5),
            read_buffer: 1024,
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_refused_connect_fails_without_ready() {
        let mut h = harness();
        let endpoint = endpoint(format!("127.0.0.1:{}", closed_port().await));
        let mut conn = Connection::unsupervised(endpoint.kind, endpoint.addr.clone(), &h.cx);

        let outcome = endpoint.attempt(&mut conn, &mut h.cx).await;
        match outcome {
            AttemptOutcome::Failed { error, reached_ready } => {
                assert!(!reached_ready);
                assert_eq!(error.severity(), crate::error::Severity::Transient);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(h.events.try_recv().unwrap().state, ConnectionState::Preparing);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reads_chunks_until_peer_closes() {
        let mut h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = endpoint(listener.local_addr().unwrap().to_string());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"first").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"second").await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut conn = Connection::unsupervised(endpoint.kind, endpoint.addr.clone(), &h.cx);
        let outcome = endpoint.attempt(&mut conn, &mut h.cx).await;
        server.await.unwrap();

        assert!(matches!(
            outcome,
            AttemptOutcome::Failed {
                error: TransportError::PeerClosed,
                reached_ready: true
            }
        ));
        assert_eq!(*conn.state(), ConnectionState::Ready);

        let mut received = Vec::new();
        while let Ok(Inbound::Chunk(chunk)) = h.chunks.try_recv() {
            assert_eq!(chunk.connection, conn.id());
            received.extend_from_slice(&chunk.bytes);
        }
        assert_eq!(received, b"firstsecond");
    }

    #[tokio::test]
    async fn test_stop_interrupts_idle_read() {
        let Harness { mut cx, stop, .. } = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = endpoint(listener.local_addr().unwrap().to_string());

        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.send_replace(true);
            // Keep the sender alive so the loop sees `true`, not a closed channel
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut conn = Connection::unsupervised(endpoint.kind, endpoint.addr.clone(), &cx);
        let outcome =
            tokio::time::timeout(Duration::from_secs(5), endpoint.attempt(&mut conn, &mut cx))
                .await
                .expect("stop should end the read loop");
        assert!(matches!(outcome, AttemptOutcome::Stopped));
        assert_eq!(*conn.state(), ConnectionState::Ready);
    }
}
