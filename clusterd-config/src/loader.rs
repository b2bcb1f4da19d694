//! Configuration loading and environment variable handling

use std::path::Path;
use std::time::Duration;

use crate::domains::ClusterdConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with the default `CLUSTERD` prefix
    pub fn new() -> Self {
        Self {
            prefix: "CLUSTERD".to_string(),
        }
    }

    /// Create a new config loader with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ClusterdConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: ClusterdConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ClusterdConfig> {
        let mut config = ClusterdConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ClusterdConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut ClusterdConfig) -> ConfigResult<()> {
        if let Some(count) = self.parse_env("MAX_WORKER_COUNT")? {
            config.scheduler.max_worker_count = count;
        }
        if let Some(count) = self.parse_env("MAX_TEMP_WORKERS")? {
            config.scheduler.max_temp_workers = count;
        }
        if let Some(seconds) = self.parse_env("DEADLOCK_THRESHOLD_TIMEOUT")? {
            config.scheduler.deadlock_threshold_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.parse_env("TASK_UNRESPONSIVE_TIMEOUT")? {
            config.scheduler.task_unresponsive_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.parse_env("TASK_ABANDONED_TIMEOUT")? {
            config.scheduler.task_abandoned_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.parse_env("DELETE_AFTER_TERMINAL")? {
            config.scheduler.delete_after_terminal = Duration::from_secs(seconds);
        }
        if let Some(limit) = self.parse_env("WORKER_TASK_LIMIT")? {
            config.scheduler.worker_task_limit = Some(limit);
        }
        if let Ok(binary) = std::env::var(self.env_name("WORKER_BINARY")) {
            config.scheduler.worker_binary = Some(binary.into());
        }
        Ok(())
    }

    fn env_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn parse_env<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let var = self.env_name(name);
        match std::env::var(&var) {
            Ok(value) => value
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::Env(format!("invalid {}: {}", var, e))),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
