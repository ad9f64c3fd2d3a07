//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PushwireSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PUSHWIRE_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use pushwire_gateway::Environment;
use pushwire_logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PushwireSettings;

/// Resolve the path to the settings file (`~/.pushwire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pushwire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PushwireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PushwireSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<PushwireSettings> {
    let defaults = serde_json::to_value(PushwireSettings::default())?;

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

/// Reject values no client could run with.
pub fn validate(settings: &PushwireSettings) -> Result<()> {
    let gateway = &settings.gateway;
    if gateway.connect_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "gateway.connectTimeoutMs must be positive".into(),
        ));
    }
    if u32::try_from(gateway.expiry_secs).is_err() {
        return Err(SettingsError::InvalidValue(format!(
            "gateway.expirySecs {} does not fit a 32-bit timestamp",
            gateway.expiry_secs
        )));
    }
    for (name, endpoint) in [
        ("productionEndpoint", &gateway.production_endpoint),
        ("sandboxEndpoint", &gateway.sandbox_endpoint),
    ] {
        if endpoint.host.is_empty() || endpoint.port == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "gateway.{name} must have a host and a non-zero port"
            )));
        }
    }
    Ok(())
}

/// Apply `PUSHWIRE_*` environment overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut PushwireSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides(settings: &mut PushwireSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PUSHWIRE_CERTIFICATE") {
        settings.gateway.certificate = Some(v);
    }
    if let Some(v) = env.string("PUSHWIRE_PASSPHRASE") {
        settings.gateway.pass_phrase = Some(v);
    }
    if let Some(v) = env.parsed("PUSHWIRE_ENVIRONMENT", |v| v.parse::<Environment>().ok()) {
        settings.gateway.environment = v;
    }
    if let Some(v) = env.string("PUSHWIRE_CA_FILE") {
        settings.gateway.ca_file = Some(v);
    }
    if let Some(v) = env.parsed("PUSHWIRE_CONNECT_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1, 600_000)
    }) {
        settings.gateway.connect_timeout_ms = v;
    }
    if let Some(v) = env.parsed("PUSHWIRE_RESPONSE_WAIT_MS", |v| {
        parse_u64_range(v, 0, 60_000)
    }) {
        settings.gateway.response_wait_ms = v;
    }
    if let Some(v) = env.parsed("PUSHWIRE_EXPIRY_SECS", |v| {
        parse_u64_range(v, 0, 31_536_000)
    }) {
        settings.gateway.expiry_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PUSHWIRE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PUSHWIRE_LOG_FORMAT", |v| v.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
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
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
