use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::probe::LivenessProbe;

pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_DATA_BUFFER: usize = 64;

/// Reconnection policy of a persistent stream. Fixed once the stream is
/// built.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    /// Delay before a non-forced reconnect, in ms. 0 reconnects right away.
    #[serde(alias = "waitBeforeReconnection")]
    pub wait_before_reconnect_ms: u64,
    /// Reconnect when the server ends the stream cleanly.
    pub reconnect_on_close: bool,
    /// Reconnect after request and stream failures.
    pub reconnect_on_error: bool,
    /// Inactivity budget in ms; 0 disables the keepalive watchdog.
    #[serde(alias = "keepaliveTime")]
    pub keepalive_ms: u64,
    /// How often the liveness probe is polled while reconnecting.
    #[serde(alias = "pingInterval")]
    pub probe_interval_ms: u64,
    /// Upper bound on a single probe check in ms; 0 lets a check run as
    /// long as it needs.
    pub probe_timeout_ms: u64,
    /// Trace every received chunk.
    #[serde(alias = "debugOnData")]
    pub log_data: bool,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Chunks buffered for the data consumer before the pump waits.
    pub data_buffer: usize,
    #[serde(skip)]
    pub liveness_probe: Option<Arc<dyn LivenessProbe>>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            wait_before_reconnect_ms: 0,
            reconnect_on_close: false,
            reconnect_on_error: true,
            keepalive_ms: 0,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            probe_timeout_ms: 0,
            log_data: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            data_buffer: DEFAULT_DATA_BUFFER,
            liveness_probe: None,
        }
    }
}

impl Policy {
    pub fn with_wait_before_reconnect(mut self, wait: Duration) -> Self {
        self.wait_before_reconnect_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_reconnect_on_close(mut self, enabled: bool) -> Self {
        self.reconnect_on_close = enabled;
        self
    }

    pub fn with_reconnect_on_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_error = enabled;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive_ms = keepalive.as_millis() as u64;
        self
    }

    pub fn with_liveness_probe(mut self, probe: impl LivenessProbe) -> Self {
        self.liveness_probe = Some(Arc::new(probe));
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_probe_timeout(mut self, limit: Duration) -> Self {
        self.probe_timeout_ms = limit.as_millis() as u64;
        self
    }

    pub fn wait_before_reconnect(&self) -> Duration {
        Duration::from_millis(self.wait_before_reconnect_ms)
    }

    /// Silence tolerated before a forced reconnect: twice the keepalive,
    /// since chunks rarely land exactly on the keepalive period.
    pub fn keepalive_window(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms.saturating_mul(2)))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_ms > 0).then(|| Duration::from_millis(self.probe_timeout_ms))
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    pub fn data_buffer(&self) -> usize {
        self.data_buffer.max(1)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("wait_before_reconnect_ms", &self.wait_before_reconnect_ms)
            .field("reconnect_on_close", &self.reconnect_on_close)
            .field("reconnect_on_error", &self.reconnect_on_error)
            .field("keepalive_ms", &self.keepalive_ms)
            .field("probe_interval_ms", &self.probe_interval_ms)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("log_data", &self.log_data)
            .field("event_capacity", &self.event_capacity)
            .field("data_buffer", &self.data_buffer)
            .field("liveness_probe", &self.liveness_probe.is_some())
            .finish()
    }
}
