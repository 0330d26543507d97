//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TrackerSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TrackerSettings;

/// Resolve the default settings file (`~/.saint-tracker/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".saint-tracker")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TrackerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TrackerSettings> {
    let defaults = serde_json::to_value(TrackerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TrackerSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut TrackerSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable is parsed strictly; an unparsable or out-of-range value is
/// logged and ignored, keeping the file/default value.
pub fn apply_overrides<F>(settings: &mut TrackerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SERVER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("SERVER_PORT", |s| parse_u64_range(s, 0, 65535)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("SERVER_ALLOWEDORIGINS") {
        settings.server.allowed_origins = parse_list(&v);
    }
    if let Some(v) = env.parsed("SERVER_SHUTDOWNTIMEOUT", |s| parse_u64_range(s, 1, 3600)) {
        settings.server.shutdown_timeout_secs = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("HUB_BROADCASTCAPACITY", |s| parse_u64_range(s, 1, 1_000_000)) {
        settings.hub.broadcast_capacity = v as usize;
    }
    if let Some(v) = env.parsed("HUB_MAILBOXCAPACITY", |s| parse_u64_range(s, 1, 1_000_000)) {
        settings.hub.mailbox_capacity = v as usize;
    }
    if let Some(v) = env.parsed("HUB_MAXFRAMEBYTES", |s| parse_u64_range(s, 64, 16 * 1024 * 1024)) {
        settings.hub.max_frame_bytes = v as usize;
    }

    // ── Auth cache ──────────────────────────────────────────────────
    if let Some(v) = env.parsed("AUTH_CACHETTL", |s| parse_u64_range(s, 1, 86_400)) {
        settings.auth.cache_ttl_secs = v;
    }
    if let Some(v) = env.parsed("AUTH_SWEEPINTERVAL", |s| parse_u64_range(s, 1, 86_400)) {
        settings.auth.sweep_interval_secs = v;
    }

    // ── Database & logging ──────────────────────────────────────────
    if let Some(v) = env.string("DB_FILENAME") {
        settings.database.path = PathBuf::from(v);
    }
    if let Some(v) = env.string("LOGGER_LEVEL") {
        settings.logging.level = v.to_lowercase();
    }
    if let Some(v) = env.parsed("LOGGER_JSON", parse_bool) {
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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping empty items.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
