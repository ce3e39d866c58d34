//! Receiver configuration snapshot.
//!
//! The receiver reads one [`ReceiverConfig`] per `start()` and never looks at
//! it again; changing settings means stopping and starting with a new value.
//!
//! # Loading
//!
//! Settings come from an optional TOML file overlaid with `TELEWATCH_*`
//! environment variables:
//!
//! ```toml
//! mode = "direct-stream"
//! host = "192.168.4.1"
//! telemetry_port = 4224
//! status_port = 4225
//! restart_delay = "2s"
//! ```
//!
//! ```bash
//! TELEWATCH_MODE=multicast TELEWATCH_MULTICAST_PORT=6970 telewatch
//! ```

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use telewatch_types::TransportMode;

use crate::duration::serde_str;
use crate::error::ReceiverError;
use crate::watchdog;

/// Default multicast telemetry port.
pub const DEFAULT_MULTICAST_PORT: u16 = 6969;
/// Default multicast status/serial port.
pub const DEFAULT_MULTICAST_STATUS_PORT: u16 = 6970;
/// Default direct telemetry stream port.
pub const DEFAULT_TELEMETRY_PORT: u16 = 4224;
/// Default direct status stream port.
pub const DEFAULT_STATUS_PORT: u16 = 4225;
/// Group the field relay publishes to.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
/// Prefix of the environment variables overlaying the file settings.
pub const ENV_PREFIX: &str = "TELEWATCH";
/// Largest chunk a single read may return.
pub const MAX_READ_BUFFER: usize = 65536;

/// Immutable settings for one receiver session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Which transports to open.
    pub mode: TransportMode,
    /// Host of the direct streams.
    pub host: String,
    /// Direct telemetry stream port.
    pub telemetry_port: u16,
    /// Direct status stream port.
    pub status_port: u16,
    /// UDP port the multicast listener binds.
    pub multicast_port: u16,
    /// Alternative multicast port carrying status/serial output.
    pub multicast_status_port: u16,
    /// Multicast group joined by the listener.
    pub multicast_group: Ipv4Addr,
    /// Local interface address used for the group membership.
    ///
    /// Set this to the Wi-Fi interface address to keep multicast off cellular
    /// links. `0.0.0.0` lets the OS choose.
    pub multicast_interface: Ipv4Addr,
    /// Stream connect timeout.
    #[serde(with = "serde_str")]
    pub connect_timeout: Duration,
    /// TCP keepalive idle and retry interval.
    #[serde(with = "serde_str")]
    pub keepalive: Duration,
    /// Delay before a waiting or failed endpoint is restarted.
    #[serde(with = "serde_str")]
    pub restart_delay: Duration,
    /// Consecutive transient failures a stream tolerates before it is marked failed.
    pub max_transient_retries: u32,
    /// Watchdog tick period.
    #[serde(with = "serde_str")]
    pub watchdog_period: Duration,
    /// Silence after which the receiver reports disconnected.
    #[serde(with = "serde_str")]
    pub liveness_threshold: Duration,
    /// Idle time after which a multicast association is retired.
    #[serde(with = "serde_str")]
    pub association_idle: Duration,
    /// Read buffer size (maximum chunk length).
    pub read_buffer: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Multicast,
            host: "localhost".to_string(),
            telemetry_port: DEFAULT_TELEMETRY_PORT,
            status_port: DEFAULT_STATUS_PORT,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_status_port: DEFAULT_MULTICAST_STATUS_PORT,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            connect_timeout: Duration::from_secs(5),
            keepalive: Duration::from_secs(5),
            restart_delay: Duration::from_secs(2),
            max_transient_retries: 5,
            watchdog_period: watchdog::DEFAULT_PERIOD,
            liveness_threshold: watchdog::DEFAULT_THRESHOLD,
            association_idle: Duration::from_secs(30),
            read_buffer: MAX_READ_BUFFER,
        }
    }
}

impl ReceiverConfig {
    /// Multicast-only configuration on the given port.
    pub fn multicast(port: u16) -> Self {
        Self {
            mode: TransportMode::Multicast,
            multicast_port: port,
            ..Self::default()
        }
    }

    /// Direct-stream configuration for the given host and ports.
    pub fn direct(host: impl Into<String>, telemetry_port: u16, status_port: u16) -> Self {
        Self {
            mode: TransportMode::DirectStream,
            host: host.into(),
            telemetry_port,
            status_port,
            ..Self::default()
        }
    }

    /// Load from an optional TOML file and `TELEWATCH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ReceiverError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Environment values take precedence over the file.
    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ReceiverError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder.add_source(env.try_parsing(true)).build()?;

        let config: ReceiverConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Listen on the status/serial multicast port instead of the telemetry one.
    pub fn use_multicast_status_port(mut self) -> Self {
        self.multicast_port = self.multicast_status_port;
        self
    }

    /// `host:port` of the telemetry stream.
    pub fn telemetry_addr(&self) -> String {
        format!("{}:{}", self.host, self.telemetry_port)
    }

    /// `host:port` of the status stream.
    pub fn status_addr(&self) -> String {
        format!("{}:{}", self.host, self.status_port)
    }

    /// Reject settings the receiver cannot run with.
    pub fn validate(&self) -> Result<(), ReceiverError> {
        let invalid = |msg: String| Err(ReceiverError::Config(msg));

        if self.mode.uses_streams() {
            if self.host.trim().is_empty() {
                return invalid("host must not be empty for direct streams".to_string());
            }
            if self.telemetry_port == 0 || self.status_port == 0 {
                return invalid("stream ports must be non-zero".to_string());
            }
        }
        if self.mode.uses_multicast() {
            if self.multicast_port == 0 {
                return invalid("multicast_port must be non-zero".to_string());
            }
            if !self.multicast_group.is_multicast() {
                return invalid(format!(
                    "multicast_group {} is not a multicast address",
                    self.multicast_group
                ));
            }
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("keepalive", self.keepalive),
            ("restart_delay", self.restart_delay),
            ("watchdog_period", self.watchdog_period),
            ("liveness_threshold", self.liveness_threshold),
            ("association_idle", self.association_idle),
        ] {
            if value.is_zero() {
                return invalid(format!("{} must be greater than zero", name));
            }
        }

        if self.read_buffer == 0 || self.read_buffer > MAX_READ_BUFFER {
            return invalid(format!(
                "read_buffer must be between 1 and {} bytes",
                MAX_READ_BUFFER
            ));
        }

        Ok(())
    }
}
