//! Connection configuration
//!
//! Built once, validated, then shared read-only as `Arc<ConnectionConfig>`.
//! Every knob other than host and port has a default, so a YAML document
//! only needs to name what it changes:
//!
//! ```yaml
//! host: 192.168.1.20
//! port: 502
//! device_id: pcs-01
//! slave_id: 3
//! heartbeat_point: link_down
//! max_reconnect_attempts: -1
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// What the poller does with a batch result whose heartbeat says the remote
/// link is down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineResultPolicy {
    /// The listener is not invoked for that cycle
    #[default]
    Drop,
    /// The listener receives the result with its link-broken flag set
    Forward,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Correlation id attached to every log line of this link
    pub device_id: String,
    pub slave_id: u8,
    /// Name of the batch point that reads `true` while the remote link is down
    pub heartbeat_point: String,
    pub reconnect_delay_ms: u64,
    /// Negative retries forever, zero never retries
    pub max_reconnect_attempts: i32,
    /// Per-exchange timeout of the transport. The engine never times an
    /// exchange itself; [`TcpTransport::from_config`](crate::tcp::TcpTransport::from_config)
    /// applies this value.
    pub request_timeout_ms: u64,
    /// Pause between poll cycles; zero polls back to back
    pub poll_interval_ms: u64,
    pub initial_poll_delay_ms: u64,
    pub failure_backoff_ms: u64,
    /// Longest a writer waits for the poller to hand over the connection
    pub handoff_timeout_ms: u64,
    pub offline_results: OfflineResultPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            device_id: "modbus".to_string(),
            slave_id: DEFAULT_SLAVE_ID,
            heartbeat_point: "heartbeat".to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_attempts: -1,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            poll_interval_ms: 0,
            initial_poll_delay_ms: DEFAULT_INITIAL_POLL_DELAY_MS,
            failure_backoff_ms: DEFAULT_FAILURE_BACKOFF_MS,
            handoff_timeout_ms: DEFAULT_HANDOFF_TIMEOUT_MS,
            offline_results: OfflineResultPolicy::Drop,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ModbusError::configuration(format!("Invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::configuration("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ModbusError::configuration("port must not be 0"));
        }
        if self.heartbeat_point.is_empty() {
            return Err(ModbusError::configuration(
                "heartbeat_point must name a batch point",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ModbusError::configuration(
                "request_timeout_ms must be positive",
            ));
        }
        if self.handoff_timeout_ms == 0 {
            return Err(ModbusError::configuration(
                "handoff_timeout_ms must be positive",
            ));
        }
        Ok(())
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_heartbeat_point(mut self, name: impl Into<String>) -> Self {
        self.heartbeat_point = name.into();
        self
    }

    pub fn with_reconnect(mut self, delay_ms: u64, max_attempts: i32) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_initial_poll_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_poll_delay_ms = delay_ms;
        self
    }

    pub fn with_failure_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.failure_backoff_ms = backoff_ms;
        self
    }

    pub fn with_handoff_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.handoff_timeout_ms = timeout_ms;
        self
    }

    pub fn with_offline_results(mut self, policy: OfflineResultPolicy) -> Self {
        self.offline_results = policy;
        self
    }

    /// `None` when reconnection is unbounded
    pub fn attempt_limit(&self) -> Option<u32> {
        u32::try_from(self.max_reconnect_attempts).ok()
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.initial_poll_delay_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}
