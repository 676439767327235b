use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub locks: LockConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LockConfig {
    pub ttl_secs: u64,
    pub max_wait_secs: u64,
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://quotient.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            locks: LockConfig { ttl_secs: 10, max_wait_secs: 30 },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Compact,
            },
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    database: FileDatabase,
    #[serde(default)]
    locks: FileLocks,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileLocks {
    ttl_secs: Option<u64>,
    max_wait_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl EngineConfig {
    /// Loads configuration: defaults, then the optional TOML file, then
    /// `QUOTIENT_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = fs::read_to_string(path)
                .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
            let file: FileConfig = toml::from_str(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;
            config.apply_file(file);
        }

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(url) = file.database.url {
            self.database.url = url;
        }
        if let Some(max) = file.database.max_connections {
            self.database.max_connections = max;
        }
        if let Some(timeout) = file.database.timeout_secs {
            self.database.timeout_secs = timeout;
        }
        if let Some(ttl) = file.locks.ttl_secs {
            self.locks.ttl_secs = ttl;
        }
        if let Some(max_wait) = file.locks.max_wait_secs {
            self.locks.max_wait_secs = max_wait;
        }
        if let Some(level) = file.logging.level {
            self.logging.level = level;
        }
        if let Some(format) = file.logging.format {
            self.logging.format = format;
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("QUOTIENT_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("QUOTIENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(value) = env::var("QUOTIENT_LOCK_TTL_SECS") {
            self.locks.ttl_secs = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "QUOTIENT_LOCK_TTL_SECS".to_string(),
                value,
            })?;
        }
        if let Ok(value) = env::var("QUOTIENT_LOCK_MAX_WAIT_SECS") {
            self.locks.max_wait_secs =
                value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "QUOTIENT_LOCK_MAX_WAIT_SECS".to_string(),
                    value,
                })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.locks.ttl_secs == 0 {
            return Err(ConfigError::Validation("locks.ttl_secs must be positive".to_string()));
        }
        if self.locks.max_wait_secs < self.locks.ttl_secs {
            return Err(ConfigError::Validation(
                "locks.max_wait_secs must not undercut locks.ttl_secs".to_string(),
            ));
        }
        Ok(())
    }
}
