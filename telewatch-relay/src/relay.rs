//! The relay: wraps text lines into envelopes and publishes them.

use std::net::SocketAddr;

use chrono::Local;
use telewatch_types::Envelope;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::output::{Emitter, Output};

/// Envelope type used when none is configured.
pub const DEFAULT_MESSAGE_TYPE: &str = "serial";

/// Publishes text lines as envelopes to every configured output.
///
/// # Example
///
/// ```rust,no_run
/// use std::net::Ipv4Addr;
/// use telewatch_relay::{Output, Relay};
///
/// #[tokio::main]
/// async fn main() -> Result<(), telewatch_relay::RelayError> {
///     let relay = Relay::builder()
///         .output(Output::multicast(Ipv4Addr::new(224, 0, 0, 1), 6970))
///         .output(Output::stream("0.0.0.0:4225"))
///         .build()
///         .await?;
///
///     let stdin = tokio::io::BufReader::new(tokio::io::stdin());
///     relay.run(stdin).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Relay {
    message_type: String,
    emitters: Vec<Emitter>,
}

impl Relay {
    /// Create a builder for configuring the relay.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Wrap `line` into an envelope stamped with the local time.
    ///
    /// Returns `None` for lines that are empty after trimming.
    pub fn envelope(&self, line: &str) -> Option<Envelope> {
        let data = line.trim();
        if data.is_empty() {
            return None;
        }
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        Some(Envelope::new(self.message_type.clone(), timestamp, data))
    }

    /// Publish one line to every output.
    ///
    /// Returns `false` if the line was empty and nothing was sent. A failing
    /// output is logged and skipped.
    pub async fn publish_line(&self, line: &str) -> Result<bool, RelayError> {
        let Some(envelope) = self.envelope(line) else {
            return Ok(false);
        };
        let json = serde_json::to_string(&envelope)?;
        debug!(data = %envelope.data, "Publishing");

        for emitter in &self.emitters {
            if let Err(e) = emitter.emit(&envelope, &json).await {
                warn!(error = %e, "Output failed to send");
            }
        }
        Ok(true)
    }

    /// Publish every line of `reader` until EOF and return how many were sent.
    ///
    /// Invalid UTF-8 is dropped from the line rather than rejecting it.
    pub async fn run<R>(&self, mut reader: R) -> Result<u64, RelayError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut published = 0;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(RelayError::Input)?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf).replace(char::REPLACEMENT_CHARACTER, "");
            if self.publish_line(&line).await? {
                published += 1;
            }
        }

        info!(published, "Input finished");
        Ok(published)
    }

    /// Local addresses of the stream outputs, in the order they were added.
    pub fn stream_addrs(&self) -> Vec<SocketAddr> {
        self.emitters.iter().filter_map(Emitter::stream_addr).collect()
    }

    /// Number of connected stream subscribers across all stream outputs.
    pub async fn subscriber_count(&self) -> usize {
        let mut total = 0;
        for emitter in &self.emitters {
            total += emitter.subscribers().await;
        }
        total
    }
}

/// Builder for configuring a [`Relay`].
#[derive(Debug, Default)]
pub struct RelayBuilder {
    outputs: Vec<Output>,
    message_type: Option<String>,
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; every line goes to all of them.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Set the envelope `type`. Defaults to `"serial"`.
    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Open every output and build the relay.
    pub async fn build(self) -> Result<Relay, RelayError> {
        if self.outputs.is_empty() {
            return Err(RelayError::NoOutputs);
        }

        let mut emitters = Vec::with_capacity(self.outputs.len());
        for output in self.outputs {
            emitters.push(output.open().await?);
        }

        Ok(Relay {
            message_type: self
                .message_type
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            emitters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_build_requires_outputs() {
        assert!(matches!(
            Relay::builder().build().await,
            Err(RelayError::NoOutputs)
        ));
    }

    #[tokio::test]
    async fn test_envelope_trims_and_stamps() {
        let (output, _rx) = Output::channel(4);
        let relay = Relay::builder()
            .output(output)
            .message_type("gps")
            .build()
            .await
            .unwrap();

        let envelope = relay.envelope("  3D fix  \r\n").unwrap();
        assert_eq!(envelope.message_type, "gps");
        assert_eq!(envelope.data, "3D fix");
        // e.g. 2024-05-01T12:00:00.123456
        assert_eq!(envelope.timestamp.len(), 26);
        assert_eq!(&envelope.timestamp[10..11], "T");

        assert!(relay.envelope(" \t\r\n").is_none());
    }

    #[tokio::test]
    async fn test_run_publishes_non_empty_lines() {
        let (output, mut rx) = Output::channel(16);
        let relay = Relay::builder().output(output).build().await.unwrap();

        let input = Cursor::new(b"ARMED\n\n  \nGPS 3D fix\r\nbad \xff byte\nno newline".to_vec());
        let published = relay.run(input).await.unwrap();
        assert_eq!(published, 4);

        let data: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.data).collect();
        assert_eq!(data, vec!["ARMED", "GPS 3D fix", "bad  byte", "no newline"]);
    }

    #[tokio::test]
    async fn test_failing_output_is_skipped() {
        let (full, mut full_rx) = Output::channel(1);
        let (open, mut open_rx) = Output::channel(4);
        let relay = Relay::builder().output(full).output(open).build().await.unwrap();

        assert!(relay.publish_line("one").await.unwrap());
        assert!(relay.publish_line("two").await.unwrap());

        assert_eq!(full_rx.recv().await.unwrap().data, "one");
        assert!(full_rx.try_recv().is_err());
        assert_eq!(open_rx.recv().await.unwrap().data, "one");
        assert_eq!(open_rx.recv().await.unwrap().data, "two");
    }

    #[tokio::test]
    async fn test_stream_addrs() {
        let relay = Relay::builder()
            .output(Output::stream("127.0.0.1:0"))
            .build()
            .await
            .unwrap();
        let addrs = relay.stream_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
        assert_eq!(relay.subscriber_count().await, 0);
        assert_eq!(relay.message_type(), DEFAULT_MESSAGE_TYPE);
    }

    #[tokio::test]
    async fn test_listen_conflict_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let result = Relay::builder().output(Output::stream(addr)).build().await;
        assert!(matches!(result, Err(RelayError::Listen { .. })));
    }
}
