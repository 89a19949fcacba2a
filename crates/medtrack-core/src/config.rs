//! Configuration for the device trust guard
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/medtrack/guard.toml
//! - Linux: ~/.config/medtrack/guard.toml
//! - Windows: %APPDATA%/medtrack/guard.toml

use std::path::{Path, PathBuf};

use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Upper bound for `ledger.retention_days`
pub const MAX_RETENTION_DAYS: i64 = 3650;
/// Upper bound for `limits.block_duration_mins` (30 days)
pub const MAX_BLOCK_DURATION_MINS: i64 = 43_200;

/// What to decide when the document store cannot be read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Fail open: permit the guarded action
    Allow,
    /// Fail closed: deny the guarded action
    Deny,
}

/// How emails are kept in attempt records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailMode {
    /// Stored as given
    Plain,
    /// SHA-256 of the lowercased, trimmed address
    Hashed,
    /// Not stored
    Omit,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Login/register rate limits
    pub limits: LimitsConfig,
    /// Attempt ledger settings
    pub ledger: LedgerConfig,
    /// Suspicious device report thresholds
    pub reporter: ReporterConfig,
    /// Support ticket quota
    pub tickets: TicketConfig,
    /// Storage locations
    pub store: StoreConfig,
}

/// Login/register rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub hourly_login: usize,
    pub daily_login: usize,
    pub hourly_register: usize,
    pub daily_register: usize,
    /// Failed attempts in the last hour that trigger a block
    pub failure_block_threshold: usize,
    /// Length of an automatic block in minutes
    pub block_duration_mins: i64,
    pub on_store_error: StoreErrorPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hourly_login: 100,
            daily_login: 500,
            hourly_register: 100,
            daily_register: 100,
            failure_block_threshold: 15,
            block_duration_mins: 60,
            on_store_error: StoreErrorPolicy::Allow,
        }
    }
}

impl LimitsConfig {
    /// Block length, clamped to the accepted range
    pub fn block_duration(&self) -> Duration {
        Duration::minutes(self.block_duration_mins.clamp(1, MAX_BLOCK_DURATION_MINS))
    }
}

/// Attempt ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts older than this are pruned on every write
    pub retention_days: i64,
    /// Compare-and-swap retries before an attempt is dropped
    pub max_write_retries: u32,
    pub email_mode: EmailMode,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_write_retries: 3,
            email_mode: EmailMode::Plain,
        }
    }
}

impl LedgerConfig {
    /// Retention window, clamped to the accepted range
    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days.clamp(1, MAX_RETENTION_DAYS))
    }
}

/// Suspicious device report thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Lifetime attempt count that flags a device
    pub min_total_attempts: u64,
    /// Failures in the last 24 hours that flag a device
    pub min_recent_failures: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_total_attempts: 3,
            min_recent_failures: 1,
        }
    }
}

/// Support ticket quota
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Tickets allowed per device in any trailing 24 hours
    pub daily_limit: usize,
    pub on_store_error: StoreErrorPolicy,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            daily_limit: 3,
            on_store_error: StoreErrorPolicy::Deny,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path (uses the system data dir if None)
    pub db_path: Option<PathBuf>,
    /// Device-local key-value file (uses the system data dir if None)
    pub device_id_path: Option<PathBuf>,
}

impl GuardConfig {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: GuardConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values that would disable or break the guard
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("limits.hourly_login", self.limits.hourly_login),
            ("limits.daily_login", self.limits.daily_login),
            ("limits.hourly_register", self.limits.hourly_register),
            ("limits.daily_register", self.limits.daily_register),
            (
                "limits.failure_block_threshold",
                self.limits.failure_block_threshold,
            ),
            (
                "reporter.min_recent_failures",
                self.reporter.min_recent_failures,
            ),
            ("tickets.daily_limit", self.tickets.daily_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }

        if self.reporter.min_total_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reporter.min_total_attempts must be at least 1".into(),
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.ledger.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "ledger.retention_days must be between 1 and {}, got {}",
                MAX_RETENTION_DAYS, self.ledger.retention_days
            )));
        }
        if !(1..=MAX_BLOCK_DURATION_MINS).contains(&self.limits.block_duration_mins) {
            return Err(ConfigError::Invalid(format!(
                "limits.block_duration_mins must be between 1 and {}, got {}",
                MAX_BLOCK_DURATION_MINS, self.limits.block_duration_mins
            )));
        }

        Ok(())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("guard.toml"))
    }

    /// Effective SQLite path (config override or system data dir)
    pub fn db_path(&self) -> PathBuf {
        self.store
            .db_path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("guard.db")))
            .unwrap_or_else(|| PathBuf::from("guard.db"))
    }

    /// Effective device-local key-value path
    pub fn device_id_path(&self) -> PathBuf {
        self.store
            .device_id_path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("device.json")))
            .unwrap_or_else(|| PathBuf::from("device.json"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "medtrack", "medtrack")
}
