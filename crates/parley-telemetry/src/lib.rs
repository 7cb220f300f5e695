//! # parley-telemetry
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` built from the
//! configured level plus per-module overrides, and a pretty or JSON stdout
//! formatter. `RUST_LOG` wins over everything configured here.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"parley_store" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from a textual level such as `"debug"`.
    pub fn from_level_str(level: &str, json: bool) -> Result<Self, TelemetryError> {
        let log_level =
            Level::from_str(level).map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;
        Ok(Self {
            log_level,
            json,
            ..Self::default()
        })
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Filter directives equivalent to this config, e.g. `info,parley_store=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}
