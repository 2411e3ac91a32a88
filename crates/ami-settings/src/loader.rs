//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `AMI_BRIDGE_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BridgeSettings;

/// Resolve the path to the settings file (`~/.ami-bridge/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ami-bridge").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(
    settings: &mut BridgeSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("AMI_BRIDGE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("AMI_BRIDGE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("AMI_BRIDGE_PING_INTERVAL_MS", 1_000, 600_000) {
        settings.server.ping_interval_ms = v;
    }
    if let Some(v) = env.u64("AMI_BRIDGE_PONG_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.server.pong_timeout_ms = v;
    }

    // ── AMI ─────────────────────────────────────────────────────────
    if let Some(v) = env.bool("AMI_BRIDGE_AMI_AUTO_CONNECT") {
        settings.ami.auto_connect = v;
    }
    if let Some(v) = env.string("AMI_BRIDGE_AMI_HOST") {
        settings.ami.host = v;
    }
    if let Some(v) = env.u16("AMI_BRIDGE_AMI_PORT", 1, 65535) {
        settings.ami.port = v;
    }
    if let Some(v) = env.string("AMI_BRIDGE_AMI_USERNAME") {
        settings.ami.username = v;
    }
    if let Some(v) = env.string("AMI_BRIDGE_AMI_SECRET") {
        settings.ami.secret = v;
    }
    if let Some(v) = env.u64("AMI_BRIDGE_AMI_ACTION_TIMEOUT_MS", 100, 600_000) {
        settings.ami.action_timeout_ms = v;
    }
    if let Some(v) = env.bool("AMI_BRIDGE_AMI_RECONNECT") {
        settings.ami.reconnect.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("AMI_BRIDGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("AMI_BRIDGE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
