//! Process-wide configuration
//!
//! Defaults come from `MYSTIC_*` environment variables and may be overridden
//! programmatically before the global handle is initialized. Directory
//! creation happens at init; an invalid environment tag or an uncreatable
//! path is fatal.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::MysticError;
use crate::logger::LogFormat;

/// Deployment environment tag, used by the mock strategy to gate itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = MysticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(MysticError::Config(format!(
                "unknown environment {other:?} (expected development, testing, or production)"
            ))),
        }
    }
}

/// Profiling depth for the performance tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    Off,
    /// Timing only.
    Basic,
    /// Timing plus RSS deltas per call.
    Memory,
}

/// Mystic runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysticConfig {
    pub environment: Environment,
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_cache_entries: usize,
    pub max_snapshots: usize,
    pub log_format: LogFormat,
    pub filter_sensitive: bool,
    pub profile_mode: ProfileMode,
}

impl Default for MysticConfig {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = project_root.join(".mystic").join("data");
        Self {
            environment: Environment::Development,
            cache_dir: data_dir.join("cache"),
            log_dir: data_dir.join("logs"),
            data_dir,
            project_root,
            max_cache_entries: 1000,
            max_snapshots: 1000,
            log_format: LogFormat::Console,
            filter_sensitive: true,
            profile_mode: ProfileMode::Basic,
        }
    }
}

impl MysticConfig {
    /// Build a configuration from `MYSTIC_*` environment variables, falling
    /// back to defaults for anything unset. Does not touch the filesystem;
    /// call [`MysticConfig::ensure_dirs`] before use.
    pub fn from_env() -> Result<Self, MysticError> {
        let mut config = Self::default();

        if let Ok(env) = std::env::var("MYSTIC_ENVIRONMENT") {
            config.environment = env.parse()?;
        }
        if let Ok(dir) = std::env::var("MYSTIC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.cache_dir = config.data_dir.join("cache");
            config.log_dir = config.data_dir.join("logs");
        }
        if let Ok(dir) = std::env::var("MYSTIC_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("MYSTIC_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var("MYSTIC_FILTER_SENSITIVE") {
            config.filter_sensitive = parse_bool(&raw).ok_or_else(|| {
                MysticError::Config(format!(
                    "MYSTIC_FILTER_SENSITIVE: expected a boolean, got {raw:?}"
                ))
            })?;
        }

        Ok(config)
    }

    /// Create the data/cache/log directories, failing fast on any error.
    pub fn ensure_dirs(&self) -> Result<(), MysticError> {
        for dir in [&self.data_dir, &self.cache_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                MysticError::Config(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        self.cache_dir = dir.join("cache");
        self.log_dir = dir.join("logs");
        self.data_dir = dir;
        self
    }

    /// Install this configuration as the process-wide handle. The first
    /// caller wins; later calls return the already-installed config.
    pub fn install(self) -> &'static MysticConfig {
        GLOBAL.get_or_init(|| self)
    }

    /// The process-wide configuration, initializing from the environment on
    /// first access.
    pub fn global() -> &'static MysticConfig {
        GLOBAL.get_or_init(|| MysticConfig::from_env().unwrap_or_default())
    }
}

static GLOBAL: OnceLock<MysticConfig> = OnceLock::new();

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
