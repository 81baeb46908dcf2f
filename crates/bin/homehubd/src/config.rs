//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `homehub.toml` in the working directory, or the file named by
//! `HOMEHUB_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use homehub_app::scheduler::SchedulerConfig;
use homehub_domain::entity::EntitySpec;
use homehub_domain::scene::SceneSpec;

const DEFAULT_PATH: &str = "homehub.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kernel tunables.
    pub core: CoreConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Plugin toggles.
    pub plugins: PluginsConfig,
    /// Declared entities, loaded in order.
    pub entities: Vec<EntitySpec>,
    /// Flows in micro syntax, keyed by flow name.
    pub flows: BTreeMap<String, Vec<serde_json::Value>>,
    /// Declared scenes.
    pub scenes: Vec<SceneSpec>,
}

/// Scheduler settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Grace window, in seconds, before pending tasks are cancelled.
    pub shutdown_delay_secs: u64,
    /// Let protected tasks finish during shutdown.
    pub allow_protected_tasks: bool,
    /// Capacity of the job hand-off queue.
    pub queue_capacity: usize,
    /// Blocking jobs allowed to run at once.
    pub blocking_workers: usize,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Per-plugin toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Enable the virtual/demo plugin.
    #[serde(rename = "virtual")]
    pub virtual_enabled: bool,
}

impl Config {
    /// Load configuration from `homehub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HOMEHUB_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = var("HOMEHUB_SHUTDOWN_DELAY").and_then(|val| val.parse().ok()) {
            self.core.shutdown_delay_secs = secs;
        }
        if let Some(allow) = var("HOMEHUB_ALLOW_PROTECTED").and_then(|val| val.parse().ok()) {
            self.core.allow_protected_tasks = allow;
        }
        if let Some(val) = var("HOMEHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.core.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.core.blocking_workers == 0 {
            return Err(ConfigError::Validation(
                "blocking_workers must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl CoreConfig {
    /// Kernel tunables for [`homehub_app::hub::Hub::new`].
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            shutdown_delay: Duration::from_secs(self.shutdown_delay_secs),
            allow_protected_tasks: self.allow_protected_tasks,
            queue_capacity: self.queue_capacity,
            blocking_workers: self.blocking_workers,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            shutdown_delay_secs: defaults.shutdown_delay.as_secs(),
            allow_protected_tasks: defaults.allow_protected_tasks,
            queue_capacity: defaults.queue_capacity,
            blocking_workers: defaults.blocking_workers,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homehubd=info,homehub_app=info,homehub_adapter_virtual=info".to_string(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
