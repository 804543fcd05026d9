//! Settings loading: defaults, settings file, environment overrides.
//!
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `ROOMRELAY_*` environment overrides
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, LogLevel, OverflowPolicy, RelaySettings};

/// Resolve the default settings file path (`~/.roomrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roomrelay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. Unreadable or malformed files and
/// out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

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
///
/// Objects merge per key, arrays and primitives in `source` replace the
/// target, and `null` in `source` keeps the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    if settings.session.outbound_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "session.outboundQueueCapacity must be at least 1".into(),
        ));
    }
    if settings.session.max_message_bytes == 0 {
        return Err(SettingsError::InvalidValue(
            "session.maxMessageBytes must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply `ROOMRELAY_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ROOMRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_PORT", |s| parse_range::<u16>(s, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("ROOMRELAY_STATIC_DIR") {
        settings.server.static_dir = PathBuf::from(v);
    }
    if let Some(v) = env.parsed("ROOMRELAY_QUEUE_CAPACITY", |s| {
        parse_range::<usize>(s, 1, 1_048_576)
    }) {
        settings.session.outbound_queue_capacity = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_OVERFLOW_POLICY", OverflowPolicy::from_name) {
        settings.session.overflow_policy = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_MAX_MESSAGE_BYTES", |s| {
        parse_range::<usize>(s, 1, 16 * 1024 * 1024)
    }) {
        settings.session.max_message_bytes = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_KEEPALIVE_SECS", |s| parse_range::<u64>(s, 0, 3600)) {
        settings.session.keepalive_interval_secs = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_LOG_LEVEL", LogLevel::from_name) {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("ROOMRELAY_LOG_FORMAT", LogFormat::from_name) {
        settings.logging.format = v;
    }
}

/// Parse an integer and check it lies in `min..=max`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
