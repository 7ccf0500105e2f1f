//! Tracing/logging initialization.
//!
//! JSON lines by default, filtered through `EnvFilter`.

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "STOCK_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    /// Human-readable, for local runs.
    Pretty,
}

impl LogFormat {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => bail!("unknown log format '{other}' (expected json or pretty)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    /// Defaults, with the format overridden by `STOCK_LOG_FORMAT` when it parses.
    pub fn from_env() -> Self {
        let format = std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|raw| LogFormat::parse(&raw).ok())
            .unwrap_or_default();
        Self {
            format,
            ..Self::default()
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter)
            .with_context(|| format!("invalid default filter '{}'", config.default_filter))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|e| anyhow::anyhow!(e))
    .context("a global tracing subscriber is already installed")
}
