//! Configuration management for Gleaner
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use gleaner::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `GLEANER__<section>__<key>`
//!
//! Examples:
//! - `GLEANER__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `GLEANER__PIPELINE__WORKERS=8`
//! - `GLEANER__SETTINGS__THEME=nord`
//!
//! Handler secrets come from the environment only: `OPENAI_API_KEY`,
//! `SLACK_API_TOKEN`, `NTFY_TOPIC`, `MATRIX_ACCESS_TOKEN`, `JIRA_EMAIL` and
//! `JIRA_API_TOKEN`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/gleaner.toml`.
//! This can be overridden using the `GLEANER_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{AboutConfig, Config, LedgerConfig, PipelineConfig, ServerConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`GLEANER__*`)
    /// 2. TOML file (default: `config/gleaner.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
