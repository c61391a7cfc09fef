//! Bridge configuration.
//!
//! Values come from `CM_*` environment variables first; the `device-bridge`
//! binary then applies any command-line overrides on top via [`BridgeConfig::apply`].

use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "http://192.168.2.126";
pub const DEFAULT_PORT: u16 = 33000;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STARTUP_RETRY_MS: u64 = 800;
pub const DEFAULT_SLOW_REFRESH_EVERY: u64 = 10;
pub const DEFAULT_SNAPSHOT_FILE: &str = "db.live.json";

pub const ENV_DEVICE: &str = "CM_DEVICE";
pub const ENV_PORT: &str = "CM_BRIDGE_PORT";
pub const ENV_STARTUP_TIMEOUT: &str = "CM_STARTUP_TIMEOUT";
pub const ENV_POLL_INTERVAL: &str = "CM_POLL_INTERVAL";
pub const ENV_FETCH_TIMEOUT: &str = "CM_FETCH_TIMEOUT";
pub const ENV_SNAPSHOT_FILE: &str = "CM_SNAPSHOT_FILE";
pub const ENV_FALLBACK_DB: &str = "CM_FALLBACK_DB";

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Base URL of the real device, without trailing slash.
    pub device: String,
    pub port: u16,
    pub startup_timeout: Duration,
    pub startup_retry: Duration,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    /// Slow-changing fields are refreshed on every N-th poll interval.
    pub slow_refresh_every: u64,
    pub snapshot_file: PathBuf,
    /// Replaces the bundled static defaults when set.
    pub fallback_db: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            port: DEFAULT_PORT,
            startup_timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            startup_retry: Duration::from_millis(DEFAULT_STARTUP_RETRY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            slow_refresh_every: DEFAULT_SLOW_REFRESH_EVERY,
            snapshot_file: PathBuf::from(DEFAULT_SNAPSHOT_FILE),
            fallback_db: None,
        }
    }
}

/// Raw, unvalidated overrides keyed by environment variable name.
pub type Overrides = HashMap<&'static str, String>;

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let keys = [
            ENV_DEVICE,
            ENV_PORT,
            ENV_STARTUP_TIMEOUT,
            ENV_POLL_INTERVAL,
            ENV_FETCH_TIMEOUT,
            ENV_SNAPSHOT_FILE,
            ENV_FALLBACK_DB,
        ];
        let vars: Overrides = keys
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value)))
            .collect();

        let mut config = Self::default();
        config.apply(&vars)?;
        Ok(config)
    }

    /// Overlay raw string values onto this configuration and re-validate.
    pub fn apply(&mut self, vars: &Overrides) -> Result<(), ConfigError> {
        if let Some(device) = vars.get(ENV_DEVICE) {
            self.device = device.trim().trim_end_matches('/').to_string();
        }
        if let Some(port) = vars.get(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidPort {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        if let Some(value) = vars.get(ENV_STARTUP_TIMEOUT) {
            self.startup_timeout = parse_millis(ENV_STARTUP_TIMEOUT, value)?;
        }
        if let Some(value) = vars.get(ENV_POLL_INTERVAL) {
            self.poll_interval = parse_millis(ENV_POLL_INTERVAL, value)?;
        }
        if let Some(value) = vars.get(ENV_FETCH_TIMEOUT) {
            self.fetch_timeout = parse_millis(ENV_FETCH_TIMEOUT, value)?;
        }
        if let Some(path) = vars.get(ENV_SNAPSHOT_FILE) {
            self.snapshot_file = PathBuf::from(path);
        }
        if let Some(path) = vars.get(ENV_FALLBACK_DB) {
            self.fallback_db = Some(PathBuf::from(path));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::EmptyDevice);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero { key: ENV_POLL_INTERVAL });
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Zero { key: ENV_FETCH_TIMEOUT });
        }
        if self.slow_refresh_every == 0 {
            return Err(ConfigError::Zero { key: "slow_refresh_every" });
        }
        Ok(())
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidDuration {
            key,
            value: value.to_string(),
        })
}
