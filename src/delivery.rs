//! The single consumer context.
//!
//! All transports of a session feed one bounded channel. One task drains it,
//! decodes each chunk and appends the result to the sink, so the sink only
//! ever sees one caller and chunks from a given connection reach it in the
//! order they were read. The same task owns the liveness [`Watchdog`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::decode::decode_at;
use crate::sink::MessageSink;
use crate::transport::Inbound;
use crate::watchdog::Watchdog;

/// Capacity of the inbound chunk channel shared by every transport.
pub const INBOUND_CAPACITY: usize = 1024;

/// State of the delivery task for one session.
pub struct Delivery<S> {
    inbound: mpsc::Receiver<Inbound>,
    stop: watch::Receiver<bool>,
    connected: Arc<watch::Sender<bool>>,
    watchdog: Watchdog,
    period: Duration,
    sink: S,
}

impl<S: MessageSink> Delivery<S> {
    pub fn new(
        inbound: mpsc::Receiver<Inbound>,
        stop: watch::Receiver<bool>,
        connected: Arc<watch::Sender<bool>>,
        watchdog: Watchdog,
        period: Duration,
        sink: S,
    ) -> Self {
        Self {
            inbound,
            stop,
            connected,
            watchdog,
            period,
            sink,
        }
    }

    /// Run until stop is requested or every producer is gone, then hand the
    /// sink back.
    ///
    /// Once stop is observed nothing more is appended, even if chunks are
    /// still queued.
    pub async fn run(self) -> S {
        let Self {
            mut inbound,
            mut stop,
            connected,
            mut watchdog,
            period,
            mut sink,
        } = self;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = ticker.tick() => {
                    let alive = watchdog.check(Instant::now());
                    publish(&connected, alive);
                }
                item = inbound.recv() => match item {
                    Some(Inbound::Chunk(chunk)) => {
                        if *stop.borrow() {
                            break;
                        }
                        let Some(message) = decode_at(&chunk.bytes, chunk.arrived_at_ms) else {
                            trace!(connection = %chunk.connection, len = chunk.bytes.len(), "Chunk produced no message");
                            continue;
                        };
                        watchdog.record(chunk.arrived_at);
                        sink.append(message);
                        delivered += 1;
                        publish(&connected, true);
                    }
                    Some(Inbound::Clear) => {
                        debug!("Clearing messages");
                        sink.clear();
                    }
                    None => break,
                },
            }
        }

        watchdog.reset();
        publish(&connected, false);
        info!(delivered, "Delivery stopped");
        sink
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

fn publish(connected: &watch::Sender<bool>, alive: bool) {
    connected.send_if_modified(|current| {
        if *current == alive {
            return false;
        }
        info!(connected = alive, "Liveness changed");
        *current = alive;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionId, RawChunk};
    use crate::sink::MessageLog;
    use telewatch_types::current_timestamp_ms;
    use tokio::task::JoinHandle;

    struct Harness {
        inbound: mpsc::Sender<Inbound>,
        stop: watch::Sender<bool>,
        connected: watch::Receiver<bool>,
        task: JoinHandle<MessageLog>,
    }

    fn spawn() -> Harness {
        let (inbound, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (stop, stop_rx) = watch::channel(false);
        let (connected_tx, connected) = watch::channel(false);
        let delivery = Delivery::new(
            inbound_rx,
            stop_rx,
            Arc::new(connected_tx),
            Watchdog::new(Duration::from_secs(5)),
            Duration::from_secs(1),
            MessageLog::default(),
        );
        Harness {
            inbound,
            stop,
            connected,
            task: tokio::spawn(delivery.run()),
        }
    }

    fn chunk(connection: ConnectionId, bytes: &[u8]) -> Inbound {
        Inbound::Chunk(RawChunk {
            bytes: bytes.to_vec(),
            connection,
            arrived_at: Instant::now(),
            arrived_at_ms: current_timestamp_ms(),
        })
    }

    async fn finish(h: Harness) -> MessageLog {
        let Harness {
            inbound, stop, task, ..
        } = h;
        drop(inbound);
        stop.send_replace(true);
        task.await.unwrap()
    }

    #[tokio::test]
    async fn test_chunks_from_one_connection_keep_order() {
        let h = spawn();
        let conn = ConnectionId::next();
        for content in ["C1", "C2", "C3"] {
            h.inbound.send(chunk(conn, content.as_bytes())).await.unwrap();
        }

        let mut connected = h.connected.clone();
        connected.wait_for(|c| *c).await.unwrap();
        // Give the task a chance to drain the remaining chunks
        while h.inbound.capacity() < INBOUND_CAPACITY {
            tokio::task::yield_now().await;
        }

        let sink = finish(h).await;
        let contents: Vec<_> = sink.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["C1", "C2", "C3"]);
    }

    #[tokio::test]
    async fn test_nothing_appended_after_stop() {
        let h = spawn();
        h.stop.send_replace(true);
        // Already queued when the task next runs, but stop wins
        h.inbound
            .send(chunk(ConnectionId::next(), b"late"))
            .await
            .unwrap();

        let sink = h.task.await.unwrap();
        assert!(sink.is_empty());
        assert!(!*h.connected.borrow());
    }

    #[tokio::test]
    async fn test_clear_empties_sink() {
        let h = spawn();
        let conn = ConnectionId::next();
        h.inbound.send(chunk(conn, b"one")).await.unwrap();
        h.inbound.send(Inbound::Clear).await.unwrap();
        h.inbound.send(chunk(conn, b"two")).await.unwrap();

        while h.inbound.capacity() < INBOUND_CAPACITY {
            tokio::task::yield_now().await;
        }
        let sink = finish(h).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.latest().unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_dropped_chunks_do_not_mark_connected() {
        let h = spawn();
        h.inbound
            .send(chunk(ConnectionId::next(), b"   \n"))
            .await
            .unwrap();
        while h.inbound.capacity() < INBOUND_CAPACITY {
            tokio::task::yield_now().await;
        }
        assert!(!*h.connected.borrow());
        assert!(finish(h).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_flips_with_silence() {
        let h = spawn();
        let mut connected = h.connected.clone();

        h.inbound
            .send(chunk(ConnectionId::next(), b"hello"))
            .await
            .unwrap();
        connected.wait_for(|c| *c).await.unwrap();
        let last = Instant::now();

        // The paused clock auto-advances through watchdog ticks
        connected.wait_for(|c| !*c).await.unwrap();
        let silent = Instant::now() - last;
        assert!(silent >= Duration::from_secs(5));
        assert!(silent <= Duration::from_secs(6));

        h.inbound
            .send(chunk(ConnectionId::next(), b"back"))
            .await
            .unwrap();
        let back = Instant::now();
        connected.wait_for(|c| *c).await.unwrap();
        assert!(Instant::now() - back <= Duration::from_secs(1));

        let sink = finish(h).await;
        assert_eq!(sink.len(), 2);
    }
}
