//! Settings loading: defaults, file deep-merge, `COURIER_*` overrides, validation.
//!
//! Loading flow:
//! 1. Start with compiled [`CourierSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `COURIER_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CourierSettings;

/// Default settings file name, resolved against the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "courier.json";

/// Resolve the settings file: `COURIER_CONFIG` if set, else `./courier.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("COURIER_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CourierSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CourierSettings> {
    let defaults = serde_json::to_value(CourierSettings::default()).map_err(SettingsError::Shape)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CourierSettings = serde_json::from_value(merged).map_err(SettingsError::Shape)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value kept).
pub fn apply_env_overrides(settings: &mut CourierSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("COURIER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_in_range("COURIER_PORT", 0..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_in_range("COURIER_MAX_CONNECTIONS", 0..=1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_in_range("COURIER_AUTH_TIMEOUT_MS", 1..=600_000) {
        settings.server.auth_timeout_ms = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("COURIER_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_env_string("COURIER_JWT_ISSUER") {
        settings.auth.jwt_issuer = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("COURIER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("COURIER_LOG_FORMAT") {
        match v.parse() {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "COURIER_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

/// Reject settings that would leave the hub or client unusable.
pub fn validate(settings: &CourierSettings) -> Result<()> {
    let server = &settings.server;
    if server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue("server.sendQueueCapacity must be at least 1".into()));
    }
    if server.max_frame_bytes == 0 {
        return Err(SettingsError::InvalidValue("server.maxFrameBytes must be at least 1".into()));
    }
    for (name, path) in [("server.wsPath", &server.ws_path), ("server.publishPath", &server.publish_path)] {
        if !path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!("{name} must start with '/'")));
        }
    }
    if server.ws_path == server.publish_path {
        return Err(SettingsError::InvalidValue("server.wsPath and server.publishPath must differ".into()));
    }

    let client = &settings.client;
    if !(0.0..=1.0).contains(&client.jitter_ratio) {
        return Err(SettingsError::InvalidValue(format!(
            "client.jitterRatio {} outside 0..=1",
            client.jitter_ratio
        )));
    }
    if client.reconnect_delay_ms > client.max_reconnect_delay_ms {
        return Err(SettingsError::InvalidValue(
            "client.reconnectDelayMs exceeds client.maxReconnectDelayMs".into(),
        ));
    }
    Ok(())
}

/// Parse `val` and accept it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Numeric override; out-of-range or unparsable values are logged and skipped.
fn read_env_in_range<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let val = read_env_string(name)?;
    let parsed = parse_in_range(&val, range.clone());
    if parsed.is_none() {
        tracing::warn!(
            key = name,
            value = %val,
            min = %range.start(),
            max = %range.end(),
            "invalid env override, ignoring"
        );
    }
    parsed
}
