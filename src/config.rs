//! Configuration for the Synheart vitals pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::buffer::{DEFAULT_CAPACITY, DEFAULT_RETENTION_SECS};
use crate::core::dedup::DEFAULT_COOLDOWN_SECS;
use crate::core::holdover::DEFAULT_HOLD_SECS;
use crate::core::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};

/// Default HTTP port for the ingestion server.
pub const DEFAULT_HTTP_PORT: u16 = 8787;

/// Upper bound for every configured duration (30 days).
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub holdover: HoldoverConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub dedup: DedupConfig,
    pub server: ServerSettings,

    /// Path for the store snapshot and stats
    pub data_path: PathBuf,
}

/// Rolling buffer bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum samples kept per subject
    pub capacity: usize,
    /// Maximum sample age
    #[serde(with = "duration_serde")]
    pub retention: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldoverConfig {
    /// How long a reading stays live after the stream stops
    #[serde(with = "duration_serde")]
    pub hold: Duration,
}

impl Default for HoldoverConfig {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(DEFAULT_HOLD_SECS as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per subject per window
    pub max_requests: usize,
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS as u64),
        }
    }
}

/// Periodic aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between ticks
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Newest samples read per subject per tick
    pub samples_per_rollup: usize,
    /// Subjects aggregated concurrently within a tick
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            samples_per_rollup: 60,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Window in which a same-typed event for a subject is suppressed
    #[serde(with = "duration_serde")]
    pub cooldown: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Resolved default data directory.
pub fn default_data_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synheart-vitals")
}

impl Config {
    /// Defaults with `data_path` resolved to the platform data directory.
    pub fn with_default_paths() -> Self {
        Self {
            data_path: default_data_path(),
            ..Self::default()
        }
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::with_default_paths())
        }
    }

    /// Load and validate configuration from `path`.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let mut config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if config.data_path.as_os_str().is_empty() {
            config.data_path = default_data_path();
        }
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-vitals")
            .join("config.json")
    }

    /// Path of the persisted store snapshot.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.json")
    }

    /// Path of the persisted stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Reject settings that would stall or disable a component, or push
    /// expiry arithmetic out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            (self.buffer.capacity, "buffer.capacity"),
            (self.rate_limit.max_requests, "rate_limit.max_requests"),
            (self.scheduler.samples_per_rollup, "scheduler.samples_per_rollup"),
            (self.scheduler.max_concurrency, "scheduler.max_concurrency"),
        ];
        if let Some((_, name)) = counts.iter().find(|(count, _)| *count == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }

        let durations = [
            (self.buffer.retention, "buffer.retention"),
            (self.holdover.hold, "holdover.hold"),
            (self.rate_limit.window, "rate_limit.window"),
            (self.scheduler.interval, "scheduler.interval"),
            (self.dedup.cooldown, "dedup.cooldown"),
        ];
        for (duration, name) in durations {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
            if duration > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {}s",
                    MAX_DURATION.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
