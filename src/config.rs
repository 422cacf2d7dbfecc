// Client, retry, race and driver configuration

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

pub const DEFAULT_BASE_URL: &str = "https://api.resy.com";
pub const ENV_PREFIX: &str = "TABLE_SNIPER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub auth_token: String,
    pub payment_method_id: Option<i64>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub race_config: RaceConfig,
    pub driver_config: DriverConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            auth_token: String::new(),
            payment_method_id: None,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                         (KHTML, like Gecko) Version/17.0 Safari/605.1.15"
                .to_string(),
            timeout_ms: 10_000,
            retry_config: RetryConfig::default(),
            race_config: RaceConfig::default(),
            driver_config: DriverConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Layers defaults, an optional TOML file and `TABLE_SNIPER_*` env vars.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TABLE_SNIPER_RETRY_CONFIG__N_RETRIES=5`.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: ClientConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url must not be empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ClientError::ConfigError("api_key must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError("timeout_ms must be positive".into()));
        }
        if self.retry_config.n_retries == 0 {
            return Err(ClientError::ConfigError(
                "retry_config.n_retries must be at least 1".into(),
            ));
        }
        let multiplier = self.retry_config.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ClientError::ConfigError(
                "retry_config.backoff_multiplier must be a finite value of at least 1.0".into(),
            ));
        }
        if self.driver_config.deadline_ms == 0 {
            return Err(ClientError::ConfigError(
                "driver_config.deadline_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Retry wrapper settings; rate-limit backoff state is built from these per job run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub n_retries: u32,
    pub retry_on_taken_slot: bool,
    pub retry_delay_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            n_retries: 30,
            retry_on_taken_slot: true,
            retry_delay_ms: 0,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

// Number of candidates booked concurrently; 0 or 1 means single attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub parallel_candidates: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            parallel_candidates: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub heartbeat_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub deadline_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub failed_attempt_pause_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            poll_interval_ms: 50,
            deadline_ms: 30_000,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 8_000,
            failed_attempt_pause_ms: 100,
        }
    }
}

impl DriverConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
