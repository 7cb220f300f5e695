//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over the defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//!
//! Command-line flags are applied by the binary after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParleySettings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub heartbeat: HeartbeatSettings,
    pub storage: StorageSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubSettings {
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Buffer of the read pumps → hub event channel.
    pub event_buffer: usize,
    /// Longest accepted message body, in characters.
    pub max_content_len: usize,
    /// Send an `error` event back when a `message_send` is rejected or fails.
    pub notify_send_failures: bool,
    /// Tell online users when someone connects or disconnects.
    pub broadcast_presence: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            event_buffer: 1024,
            max_content_len: 4096,
            notify_send_failures: false,
            broadcast_presence: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    /// A connection with no pong for this long is dropped.
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/parley.db"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSettings {
    /// HS256 secret. When unset only session tokens are accepted.
    pub jwt_secret: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Load settings from `path` (if any) with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings(path: Option<&Path>) -> Result<ParleySettings, SettingsError> {
    let mut settings = load_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the settings file, without env overrides.
pub fn load_settings_file(path: Option<&Path>) -> Result<ParleySettings, SettingsError> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

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
///
/// Objects merge per key, arrays and primitives are replaced, and `null`
/// in `source` keeps the `target` value.
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

/// Apply `PARLEY_*` overrides from the process environment.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, so callers can supply a fake environment.
pub fn apply_overrides(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PARLEY_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("PARLEY_DB_PATH") {
        settings.storage.db_path = PathBuf::from(v);
    }
    if let Some(v) = env.string("PARLEY_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env.usize("PARLEY_SEND_QUEUE", 1, 65_536) {
        settings.hub.send_queue_capacity = v;
    }
    if let Some(v) = env.u64("PARLEY_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.heartbeat.interval_secs = v;
    }
    if let Some(v) = env.u64("PARLEY_PONG_TIMEOUT_SECS", 1, 7200) {
        settings.heartbeat.pong_timeout_secs = v;
    }
    if let Some(v) = env.bool("PARLEY_NOTIFY_SEND_FAILURES") {
        settings.hub.notify_send_failures = v;
    }
    if let Some(v) = env.bool("PARLEY_BROADCAST_PRESENCE") {
        settings.hub.broadcast_presence = v;
    }
    if let Some(v) = env.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
