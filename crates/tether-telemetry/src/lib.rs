//! Tracing subscriber setup for applications embedding tether.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets switched to `debug` by [`enable_debugging`].
pub const TETHER_TARGETS: &[&str] = &["tether_client", "tether_core"];

static DEBUGGING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "tether_client" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Config with every tether target at `debug`.
    pub fn debugging() -> Self {
        Self {
            module_levels: TETHER_TARGETS.iter().map(|t| (t.to_string(), Level::DEBUG)).collect(),
            ..Self::default()
        }
    }

    /// `EnvFilter` directives for this config.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    let debug_on = config
        .module_levels
        .iter()
        .any(|(m, l)| TETHER_TARGETS.contains(&m.as_str()) && *l >= Level::DEBUG)
        || config.log_level >= Level::DEBUG;
    DEBUGGING.store(debug_on, Ordering::Relaxed);
    Ok(())
}

/// Turn on debug output for the tether crates. A no-op when a subscriber is
/// already installed.
pub fn enable_debugging() {
    if init_telemetry(&TelemetryConfig::debugging()).is_err() {
        tracing::debug!("subscriber already installed, leaving it in place");
    }
}

/// Whether tether debug output was enabled through this crate.
pub fn debugging_enabled() -> bool {
    DEBUGGING.load(Ordering::Relaxed)
}
