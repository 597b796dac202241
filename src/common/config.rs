//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::{config_path, log_dir};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Result comparison settings
    #[serde(default)]
    pub comparison: ComparisonConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reference query server settings (mock_server)
    #[serde(default)]
    pub server: ServerConfig,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Per-server bound on running and materializing one test case
    #[serde(default = "default_case")]
    pub case_secs: u64,

    /// Timeout for establishing each server connection
    #[serde(default = "default_connect")]
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            case_secs: default_case(),
            connect_secs: default_connect(),
        }
    }
}

fn default_case() -> u64 {
    30
}
fn default_connect() -> u64 {
    10
}

/// Result comparison settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ComparisonConfig {
    /// Require object key sets to match on both sides.
    ///
    /// Off by default: keys only present in the expected object are not
    /// checked.
    #[serde(default)]
    pub strict_objects: bool,
}

/// Logging settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Also write logs to this file (no ANSI colors)
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Log file path; relative paths are placed in the log directory
    pub fn resolved_file(&self) -> Option<PathBuf> {
        let file = self.file.as_ref()?;
        if file.is_absolute() {
            return Some(file.clone());
        }
        Some(log_dir().map_or_else(|| file.clone(), |dir| dir.join(file)))
    }
}

/// Reference query server settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Number of elements per cursor batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        if config.server.batch_size == 0 {
            return Err(super::Error::Config(
                "server.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
