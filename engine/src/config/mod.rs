//! Configuration management
//!
//! This module handles loading, validation, and management of the nlsql configuration.
//! Configuration is stored in TOML format at ~/.nlsql/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **session**: Idle timeout and intention history bound
//! - **analysis**: Classifier models, timeout, intention retention
//! - **enrichment**: Retrieval timeout and per-section result limits
//!
//! Every section is optional in the file; missing sections take their defaults.
//!
//! # Examples
//!
//! ```no_run
//! use nlsql_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Session timeout: {:?}", config.session.timeout());
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Intention analysis settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Context enrichment settings
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle minutes after which `sweep` ends a session
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Entries kept in a session's `intention_history` context key
    #[serde(default = "default_intention_history_limit")]
    pub intention_history_limit: usize,
}

/// Intention analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Classifier used for completion requests
    #[serde(default = "default_model")]
    pub completion_model: String,

    /// Classifier used for chat messages
    #[serde(default = "default_model")]
    pub chat_model: String,

    /// Upper bound on a single classification call
    #[serde(default = "default_analysis_timeout_ms")]
    pub timeout_ms: u64,

    /// Intentions kept in memory for relationship lookups
    #[serde(default = "default_intention_retention")]
    pub intention_retention: usize,
}

/// Context enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Upper bound on each retrieval sub-operation
    #[serde(default = "default_enrichment_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_database_limit")]
    pub database_limit: usize,

    #[serde(default = "default_table_limit")]
    pub table_limit: usize,

    #[serde(default = "default_example_limit")]
    pub example_limit: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.nlsql")
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_intention_history_limit() -> usize {
    20
}

fn default_model() -> String {
    "heuristic".to_string()
}

fn default_analysis_timeout_ms() -> u64 {
    10_000
}

fn default_intention_retention() -> usize {
    1024
}

fn default_enrichment_timeout_ms() -> u64 {
    5_000
}

fn default_database_limit() -> usize {
    5
}

fn default_table_limit() -> usize {
    5
}

fn default_example_limit() -> usize {
    3
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            intention_history_limit: default_intention_history_limit(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            completion_model: default_model(),
            chat_model: default_model(),
            timeout_ms: default_analysis_timeout_ms(),
            intention_retention: default_intention_retention(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_enrichment_timeout_ms(),
            database_limit: default_database_limit(),
            table_limit: default_table_limit(),
            example_limit: default_example_limit(),
        }
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default location (~/.nlsql/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before validation so the file keeps the unexpanded `~` path
        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.nlsql/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".nlsql").join("config.toml"))
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("nlsql.db")
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges, expands `~` in the data directory and creates it
    /// if missing.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.session.timeout_minutes == 0 {
            return Err(EngineError::Config(
                "session.timeout_minutes must be greater than 0".to_string(),
            ));
        }

        if self.session.intention_history_limit == 0 {
            return Err(EngineError::Config(
                "session.intention_history_limit must be greater than 0".to_string(),
            ));
        }

        for (field, model) in [
            ("analysis.completion_model", &self.analysis.completion_model),
            ("analysis.chat_model", &self.analysis.chat_model),
        ] {
            if model.trim().is_empty() {
                return Err(EngineError::Config(format!("{} must not be empty", field)));
            }
        }

        if self.analysis.timeout_ms == 0 || self.enrichment.timeout_ms == 0 {
            return Err(EngineError::Config(
                "timeout_ms values must be greater than 0".to_string(),
            ));
        }

        if self.analysis.intention_retention == 0 {
            return Err(EngineError::Config(
                "analysis.intention_retention must be greater than 0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.session.intention_history_limit, 20);
        assert_eq!(config.analysis.completion_model, "heuristic");
        assert_eq!(config.enrichment.example_limit, 3);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.analysis.chat_model,
            deserialized.analysis.chat_model
        );
    }

    #[test]
    fn test_timeouts() {
        let config = Config::default();
        assert_eq!(config.session.timeout(), Duration::from_secs(1800));
        assert_eq!(config.enrichment.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_huge_session_timeout_saturates() {
        let mut config = Config::default();
        config.session.timeout_minutes = u64::MAX;
        assert_eq!(config.session.timeout(), Duration::from_secs(u64::MAX));
    }
}
