//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use taskhub_core::logging::LogFormat;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::types::Settings;

/// Env var naming an optional JSON settings file.
pub const SETTINGS_PATH_VAR: &str = "TASKHUB_SETTINGS";

/// Resolve the settings file path from `TASKHUB_SETTINGS`, if set.
pub fn settings_path() -> Option<PathBuf> {
    read_env_string(SETTINGS_PATH_VAR).map(PathBuf::from)
}

/// Load settings from the file named by `TASKHUB_SETTINGS` (if any) with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(settings_path().as_deref())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file falls back to defaults. A file with invalid JSON is an error.
pub fn load_settings_from(path: Option<&Path>) -> Result<Settings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the settings file merged on top (no env, no validation).
fn read_layers(path: Option<&Path>) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary key lookup.
///
/// Invalid values are ignored with a warning (fall back to file/default).
/// Empty values count as unset.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = get("PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = get("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = get("ALLOWED_ORIGINS") {
        let origins = parse_list(&v);
        if origins.is_empty() {
            warn!(key = "ALLOWED_ORIGINS", value = %v, "no origins parsed, ignoring");
        } else {
            settings.server.allowed_origins = origins;
        }
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = get("JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── WebSocket ───────────────────────────────────────────────────
    if let Some(v) = get("TASKHUB_MAILBOX_CAPACITY") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.websocket.mailbox_capacity = n,
            None => warn!(key = "TASKHUB_MAILBOX_CAPACITY", value = %v, "invalid usize env var, ignoring"),
        }
    }
    if let Some(v) = get("TASKHUB_WRITE_WAIT_MS") {
        match parse_u64_range(&v, 1, 600_000) {
            Some(n) => settings.websocket.write_wait_ms = n,
            None => warn!(key = "TASKHUB_WRITE_WAIT_MS", value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = get("TASKHUB_PONG_WAIT_MS") {
        match parse_u64_range(&v, 2, 3_600_000) {
            Some(n) => {
                settings.websocket.pong_wait_ms = n;
                if settings.websocket.ping_period_ms >= n {
                    let ping_period_ms = n * 9 / 10;
                    info!(
                        from = settings.websocket.ping_period_ms,
                        to = ping_period_ms,
                        "ping period rescaled to fit under TASKHUB_PONG_WAIT_MS"
                    );
                    settings.websocket.ping_period_ms = ping_period_ms;
                }
            }
            None => warn!(key = "TASKHUB_PONG_WAIT_MS", value = %v, "invalid u64 env var, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = get("TASKHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = get("TASKHUB_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "TASKHUB_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
