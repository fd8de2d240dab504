//! Settings loading with environment variable overrides.
//!
//! Loading flow:
//! 1. Start with [`Policy::default()`]
//! 2. If the settings file exists, read its `policy` object; missing or null
//!    keys keep their defaults and legacy key names are accepted
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//!
//! The file may also carry a `request` object, parsed with
//! [`RequestOptions::from_value`].

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ConfigError;
use crate::policy::Policy;
use crate::request::RequestOptions;

/// Contents of a settings file.
#[derive(Clone, Debug, Default)]
pub struct StreamSettings {
    pub request: Option<RequestOptions>,
    pub policy: Policy,
}

/// Load settings from `path`, falling back to defaults when it is missing.
/// Invalid JSON is an error; a `request` entry that is not a record is an
/// `InvalidArgument`.
pub fn load_settings_from_path(path: &Path) -> Result<StreamSettings, ConfigError> {
    let mut file = if path.exists() {
        debug!(?path, "loading stream settings from file");
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str::<Value>(&content)?
    } else {
        debug!(?path, "settings file not found, using defaults");
        Value::Object(serde_json::Map::new())
    };

    let request = match file.get_mut("request").map(Value::take) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(RequestOptions::from_value(raw)?),
    };

    let mut policy = match file.get_mut("policy").map(Value::take) {
        None | Some(Value::Null) => Policy::default(),
        Some(user) => serde_json::from_value(without_nulls(user))?,
    };
    apply_env_overrides(&mut policy);

    Ok(StreamSettings { request, policy })
}

/// Load only the policy part of a settings file.
pub fn load_policy_from_path(path: &Path) -> Result<Policy, ConfigError> {
    Ok(load_settings_from_path(path)?.policy)
}

/// Drop null entries so they fall back to the field defaults.
fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}

/// Apply `TETHER_*` environment overrides to a loaded policy.
pub fn apply_env_overrides(policy: &mut Policy) {
    apply_overrides_from(policy, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an explicit variable source.
/// Invalid values are logged and ignored.
pub fn apply_overrides_from(policy: &mut Policy, lookup: impl Fn(&str) -> Option<String>) {
    let read_u64 = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    };
    let read_bool = |name: &str| {
        let val = lookup(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    };

    if let Some(v) = read_u64("TETHER_WAIT_BEFORE_RECONNECT_MS", 0, 3_600_000) {
        policy.wait_before_reconnect_ms = v;
    }
    if let Some(v) = read_bool("TETHER_RECONNECT_ON_CLOSE") {
        policy.reconnect_on_close = v;
    }
    if let Some(v) = read_bool("TETHER_RECONNECT_ON_ERROR") {
        policy.reconnect_on_error = v;
    }
    if let Some(v) = read_u64("TETHER_KEEPALIVE_MS", 0, 3_600_000) {
        policy.keepalive_ms = v;
    }
    if let Some(v) = read_u64("TETHER_PROBE_INTERVAL_MS", 1, 3_600_000) {
        policy.probe_interval_ms = v;
    }
    if let Some(v) = read_u64("TETHER_PROBE_TIMEOUT_MS", 0, 3_600_000) {
        policy.probe_timeout_ms = v;
    }
    if let Some(v) = read_bool("TETHER_LOG_DATA") {
        policy.log_data = v;
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
