use crate::broadcast::HubSettings;
use crate::broadcast::hub::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SEND_TIMEOUT, DEFAULT_SUBSCRIBER_BUFFER,
};
use crate::prediction::recency::RecencyParams;
use crate::prediction::{
    DEFAULT_OCCUPIED_THRESHOLD, DEFAULT_VALID_MINUTES, PredictionSettings, RefreshScope,
};
use crate::store::{DEFAULT_DISTANCE_FROM_ENTRY, DEFAULT_FLOOR, SlotDefaults};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const CONFIG_PATH_ENV: &str = "PARKSMART_CONFIG";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// One week.
pub const MAX_VALID_MINUTES: u64 = 7 * 24 * 60;
/// One day.
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub prediction: Option<PredictionSection>,
    #[serde(default)]
    pub broadcast: Option<BroadcastSection>,
    #[serde(default)]
    pub provisioning: Option<ProvisioningSection>,
    #[serde(default)]
    pub seed: Option<SeedSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionSection {
    /// Minutes a prediction stays valid (default: 10)
    pub valid_minutes: Option<u64>,
    /// Seconds between full re-prediction passes (default: 60)
    pub refresh_interval_secs: Option<u64>,
    /// "slot" or "all" (default: slot)
    pub refresh_scope: Option<RefreshScope>,
    pub occupied_threshold: Option<f64>,
    #[serde(default)]
    pub model: Option<RecencyParams>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastSection {
    /// Events buffered ahead of the delivery loop (default: 100)
    pub queue_capacity: Option<usize>,
    pub subscriber_buffer: Option<usize>,
    pub send_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningSection {
    pub default_floor: Option<String>,
    pub default_zone: Option<String>,
    pub default_distance_from_entry: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedSection {
    /// Seed demo slots when the store starts empty.
    pub demo: bool,
    /// Clear the store at startup and write five hours of demo history.
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

/// Load from `PARKSMART_CONFIG` if set, else the default path.
pub fn load_from_env() -> Result<(Config, PathBuf), ConfigError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_from_path(&path)?;
    Ok((config, path))
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Reject values that would fail every prediction refresh at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(prediction) = self.prediction.as_ref() else {
            return Ok(());
        };
        if let Some(minutes) = prediction.valid_minutes
            && !(1..=MAX_VALID_MINUTES).contains(&minutes)
        {
            return Err(ConfigError::Invalid(format!(
                "prediction.valid_minutes must be within 1..={MAX_VALID_MINUTES}, got {minutes}"
            )));
        }
        if let Some(secs) = prediction.refresh_interval_secs
            && secs > MAX_REFRESH_INTERVAL_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "prediction.refresh_interval_secs must be at most {MAX_REFRESH_INTERVAL_SECS}, got {secs}"
            )));
        }
        if let Some(threshold) = prediction.occupied_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(ConfigError::Invalid(format!(
                "prediction.occupied_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if let Some(model) = prediction.model.as_ref() {
            model
                .validate()
                .map_err(|reason| ConfigError::Invalid(format!("prediction.model: {reason}")))?;
        }
        Ok(())
    }

    pub fn log_level(&self) -> &str {
        let level = self.logging.level.trim();
        if level.is_empty() {
            DEFAULT_LOG_LEVEL
        } else {
            level
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn prediction_settings(&self) -> PredictionSettings {
        let section = self.prediction.as_ref();
        let minutes = section
            .and_then(|s| s.valid_minutes)
            .unwrap_or(DEFAULT_VALID_MINUTES);
        let valid_for = minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_VALID_MINUTES * 60));
        PredictionSettings {
            valid_for,
            occupied_threshold: section
                .and_then(|s| s.occupied_threshold)
                .unwrap_or(DEFAULT_OCCUPIED_THRESHOLD),
        }
    }

    pub fn model_params(&self) -> RecencyParams {
        self.prediction
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_default()
    }

    pub fn refresh_scope(&self) -> RefreshScope {
        self.prediction
            .as_ref()
            .and_then(|s| s.refresh_scope)
            .unwrap_or_default()
    }

    /// Returns the periodic refresh interval (default: 60 seconds)
    pub fn refresh_interval(&self) -> Duration {
        let secs = self
            .prediction
            .as_ref()
            .and_then(|s| s.refresh_interval_secs)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
        Duration::from_secs(secs.max(1))
    }

    pub fn hub_settings(&self) -> HubSettings {
        let section = self.broadcast.as_ref();
        HubSettings {
            queue_capacity: section
                .and_then(|s| s.queue_capacity)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            subscriber_buffer: section
                .and_then(|s| s.subscriber_buffer)
                .unwrap_or(DEFAULT_SUBSCRIBER_BUFFER),
            send_timeout: section
                .and_then(|s| s.send_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SEND_TIMEOUT),
        }
    }

    pub fn slot_defaults(&self) -> SlotDefaults {
        let section = self.provisioning.as_ref();
        SlotDefaults {
            floor: section
                .and_then(|s| s.default_floor.clone())
                .unwrap_or_else(|| DEFAULT_FLOOR.to_string()),
            zone: section
                .and_then(|s| s.default_zone.clone())
                .filter(|zone| !zone.is_empty()),
            distance_from_entry: section
                .and_then(|s| s.default_distance_from_entry)
                .unwrap_or(DEFAULT_DISTANCE_FROM_ENTRY),
        }
    }

    pub fn seed_demo(&self) -> bool {
        self.seed.as_ref().map(|s| s.demo).unwrap_or(false)
    }

    pub fn seed_reset(&self) -> bool {
        self.seed.as_ref().map(|s| s.reset).unwrap_or(false)
    }
}
