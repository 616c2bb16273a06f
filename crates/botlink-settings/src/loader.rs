//! Layered settings loading.
//!
//! 1. Compiled [`ClientSettings::default()`]
//! 2. `~/.botlink/settings.json`, deep-merged over the defaults
//! 3. `BOTLINK_*` environment overrides
//!
//! Merge rules: objects merge key by key, arrays and scalars from the file
//! replace the default, and `null` in the file leaves the default in place.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ClientSettings;

/// `~/.botlink/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".botlink").join("settings.json")
}

/// Load from [`settings_path`] and apply process environment overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` and apply process environment overrides.
///
/// A missing file yields the defaults; an unreadable or malformed one is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load from `path`, resolving environment variables through `env`.
pub fn load_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: ClientSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
}

/// Merge `overlay` into `base`, returning the result.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `BOTLINK_*` overrides looked up through `env`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut ClientSettings, env: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| env(name).filter(|v| !v.is_empty());
    let boolean = |name: &str| {
        let raw = env(name)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid boolean env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("BOTLINK_AUTH_ENDPOINT") {
        settings.auth.endpoint = Some(v);
    }
    if let Some(v) = ranged(&env, "BOTLINK_AUTH_TIMEOUT_MS", 1_000_u64, 600_000) {
        settings.auth.timeout_ms = v;
    }
    if let Some(v) = string("BOTLINK_TRANSPORT_URL") {
        settings.transport.url = Some(v);
    }
    if let Some(v) = ranged(&env, "BOTLINK_SEND_QUEUE", 1_usize, 65_536) {
        settings.transport.send_queue = v;
    }
    if let Some(v) = boolean("BOTLINK_ENABLE_MIC") {
        settings.media.enable_mic = v;
    }
    if let Some(v) = boolean("BOTLINK_ENABLE_CAM") {
        settings.media.enable_cam = v;
    }
    if let Some(v) = string("BOTLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = boolean("BOTLINK_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn ranged<T>(env: &impl Fn(&str) -> Option<String>, name: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let raw = env(name)?;
    let parsed = parse_in_range(&raw, min, max);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "out-of-range env var, ignoring");
    }
    parsed
}

fn validate(settings: &ClientSettings) -> Result<()> {
    if settings.transport.send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "transport.sendQueue must be at least 1".into(),
        ));
    }
    if settings.auth.timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "auth.timeoutMs must be positive".into(),
        ));
    }
    Ok(())
}

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and accept it only within `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
