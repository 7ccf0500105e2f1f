//! Engine configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::DomainError;

pub const ENV_APPROVAL_THRESHOLD: &str = "STOCK_ADJUSTMENT_APPROVAL_THRESHOLD";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "STOCK_MAX_CONFLICT_RETRIES";
pub const ENV_LOT_SWEEP_SECS: &str = "STOCK_LOT_SWEEP_SECS";
pub const ENV_RESERVATION_SWEEP_SECS: &str = "STOCK_RESERVATION_SWEEP_SECS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl From<ConfigError> for DomainError {
    fn from(value: ConfigError) -> Self {
        DomainError::validation(value.to_string())
    }
}

/// Tunables consulted by the workflows and background sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConfig {
    /// Adjustments whose |variance value| exceeds this need senior approval.
    pub adjustment_approval_threshold: Decimal,
    pub max_conflict_retries: u32,
    #[serde(with = "secs")]
    pub lot_sweep_interval: Duration,
    #[serde(with = "secs")]
    pub reservation_sweep_interval: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            adjustment_approval_threshold: Decimal::new(50000, 2),
            max_conflict_retries: 3,
            lot_sweep_interval: Duration::from_secs(3600),
            reservation_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StockConfig {
    /// Read overrides from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`StockConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_APPROVAL_THRESHOLD) {
            let value: Decimal = parse(ENV_APPROVAL_THRESHOLD, &raw)?;
            if value < Decimal::ZERO {
                return Err(invalid(ENV_APPROVAL_THRESHOLD, &raw));
            }
            cfg.adjustment_approval_threshold = value;
        }
        if let Some(raw) = lookup(ENV_MAX_CONFLICT_RETRIES) {
            cfg.max_conflict_retries = parse(ENV_MAX_CONFLICT_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOT_SWEEP_SECS) {
            cfg.lot_sweep_interval = Duration::from_secs(positive(ENV_LOT_SWEEP_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RESERVATION_SWEEP_SECS) {
            cfg.reservation_sweep_interval = Duration::from_secs(positive(ENV_RESERVATION_SWEEP_SECS, &raw)?);
        }

        Ok(cfg)
    }
}

fn invalid(var: &'static str, raw: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: raw.to_string(),
    }
}

fn parse<T: core::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(var, raw))
}

fn positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse::<u64>(var, raw)? {
        0 => Err(invalid(var, raw)),
        n => Ok(n),
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
