//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HaloSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `HALO_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::HaloSettings;

/// Resolve the settings file path.
///
/// `HALO_SETTINGS` wins; otherwise `~/.halo/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("HALO_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".halo").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HaloSettings> {
    let defaults = serde_json::to_value(HaloSettings::default())?;

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

    let mut settings: HaloSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
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

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall inside the stated range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Anything else is
/// ignored with a warning.
pub fn apply_env_overrides(settings: &mut HaloSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HALO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("HALO_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Health monitor ──────────────────────────────────────────────
    if let Some(v) = read_env_u64("HALO_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.health.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("HALO_CONNECTION_TIMEOUT_MS", 100, 3_600_000) {
        settings.health.connection_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("HALO_STATS_INTERVAL_MS", 1000, 3_600_000) {
        settings.health.stats_interval_ms = v;
    }
    if let Some(v) = read_env_u64("HALO_SWEEP_INTERVAL_MS", 100, 600_000) {
        settings.health.sweep_interval_ms = v;
    }

    // ── Session lifecycle ───────────────────────────────────────────
    if let Some(v) = read_env_u32("HALO_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.session.max_reconnect_attempts = v;
    }
    if let Some(v) = read_env_u64("HALO_RECONNECT_BASE_DELAY_MS", 1, 600_000) {
        settings.session.reconnect_base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("HALO_RECONNECT_MAX_DELAY_MS", 1, 3_600_000) {
        settings.session.reconnect_max_delay_ms = v;
    }

    // ── Dashboard ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("HALO_DASHBOARD_THROTTLE_MS", 0, 60_000) {
        settings.dashboard.update_throttle_ms = v;
    }
    if let Some(v) = read_env_usize("HALO_DASHBOARD_QUEUE_SIZE", 1, 100) {
        settings.dashboard.queue_size = v;
    }

    // ── Apps / logging ──────────────────────────────────────────────
    if let Some(v) = read_env_string("HALO_SYSTEM_APP") {
        settings.apps.system_app_package = v;
    }
    if let Some(v) = read_env_string("HALO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("HALO_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
