//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeatboxSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `BEATBOX_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use beatbox_core::Compression;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BeatboxSettings;

/// Default settings file: `~/.beatbox/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".beatbox").join("settings.json")
}

/// Load from [`settings_path`] with environment overrides.
pub fn load_settings() -> Result<BeatboxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides.
///
/// A missing file yields defaults. Malformed JSON and values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<BeatboxSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<BeatboxSettings> {
    let defaults = serde_json::to_value(BeatboxSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let user: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive merge of `source` over `target`.
///
/// Objects merge per key, arrays and scalars are replaced, and `null` in
/// `source` leaves the target value in place.
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

/// Apply `BEATBOX_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BeatboxSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `BEATBOX_*` overrides read through `lookup`.
///
/// Empty and unparsable values are ignored with a warning.
pub fn apply_overrides(settings: &mut BeatboxSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("BEATBOX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("BEATBOX_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("BEATBOX_PATH") {
        settings.endpoint.path = v;
    }

    let behavior = &mut settings.endpoint.behavior;
    if let Some(v) = env.parsed("BEATBOX_MAX_PAYLOAD", |s| parse_range(s, 1, usize::MAX)) {
        behavior.max_payload_length = v;
    }
    if let Some(v) = env.parsed("BEATBOX_IDLE_TIMEOUT", |s| parse_range::<u64>(s, 0, 86_400)) {
        behavior.idle_timeout = (v > 0).then_some(v);
    }
    if let Some(v) = env.parsed("BEATBOX_MAX_BACKPRESSURE", |s| parse_range(s, 1, usize::MAX)) {
        behavior.max_backpressure = v;
    }
    if let Some(v) = env.parsed("BEATBOX_COMPRESSION", Compression::parse) {
        behavior.compression = v;
    }

    if let Some(v) = env.string("BEATBOX_LOG") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("BEATBOX_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(name)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid env var, ignoring");
        }
        parsed
    }
}

// ── Pure parsing functions ─────────────────────────────────────────────────

/// Parse a boolean.
///
/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer within `min..=max`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
