use super::models::Config;
use config::{ConfigError, Environment, File};
use serde_json::{Map, Value};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "GLEANER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/gleaner.toml";
const ENV_PREFIX: &str = "GLEANER";
const ENV_SEPARATOR: &str = "__";

/// Environment variable, handler name, config field
const SECRETS: &[(&str, &str, &str)] = &[
    ("OPENAI_API_KEY", "openai", "api_key"),
    ("SLACK_API_TOKEN", "slack", "token"),
    ("NTFY_TOPIC", "ntfy", "topic"),
    ("MATRIX_ACCESS_TOKEN", "matrix", "access_token"),
    ("JIRA_EMAIL", "jira", "email"),
    ("JIRA_API_TOKEN", "jira", "token"),
];

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config, |name| env::var(name).ok());

    Ok(config)
}

/// Copy handler secrets from the environment into the initial handler
/// configs. Secrets are never read from TOML files.
fn load_secrets(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    for (var, handler, field) in SECRETS {
        let Some(secret) = lookup(var).filter(|value| !value.is_empty()) else {
            continue;
        };

        let entry = config
            .handlers
            .entry(handler.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entry {
            fields.insert(field.to_string(), Value::String(secret));
        }
        tracing::debug!(handler, field, "Loaded handler secret from environment");
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // GLEANER__PIPELINE__WORKERS -> pipeline.workers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
