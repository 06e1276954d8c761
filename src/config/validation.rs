use super::models::Config;
use crate::handlers::HandlerKind;
use thiserror::Error;
use url::Url;

const MAX_PAYLOAD_BYTES: u64 = 5 * 1024 * 1024; // 5 MB
const MIN_PREVIEW_CHARS: usize = 16;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_payload_bytes ({actual}) exceeds limit of 5MB ({limit})")]
    PayloadSizeExceedsLimit { actual: u64, limit: u64 },

    #[error("Pipeline {field} must be positive")]
    ZeroPipelineValue { field: &'static str },

    #[error("preview_chars ({actual}) must be at least {min}")]
    PreviewTooShort { actual: usize, min: usize },

    #[error("Invalid base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Initial config given for unknown handler '{name}'")]
    UnknownHandler { name: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_payload_size(config)?;
    validate_pipeline(config)?;
    validate_base_url(&config.server.base_url)?;
    validate_handlers(config)?;
    Ok(())
}

fn validate_payload_size(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_payload_bytes > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::PayloadSizeExceedsLimit {
            actual: config.server.max_payload_bytes,
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    Ok(())
}

/// Worker pool sizes and stage timeouts must be non-zero
fn validate_pipeline(config: &Config) -> Result<(), ValidationError> {
    let pipeline = &config.pipeline;
    let counts = [
        ("workers", pipeline.workers as u64),
        ("channel_size", pipeline.channel_size as u64),
        ("fetch_timeout_secs", pipeline.fetch_timeout_secs),
        ("summarize_timeout_secs", pipeline.summarize_timeout_secs),
        ("notify_timeout_secs", pipeline.notify_timeout_secs),
    ];
    if let Some((field, _)) = counts.iter().find(|(_, value)| *value == 0) {
        return Err(ValidationError::ZeroPipelineValue { field });
    }

    if pipeline.preview_chars < MIN_PREVIEW_CHARS {
        return Err(ValidationError::PreviewTooShort {
            actual: pipeline.preview_chars,
            min: MIN_PREVIEW_CHARS,
        });
    }

    Ok(())
}

fn validate_base_url(raw: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    Ok(())
}

/// Seed configs may only name built-in handlers; their contents are checked
/// against the handler schema when the registry is seeded
fn validate_handlers(config: &Config) -> Result<(), ValidationError> {
    match config
        .handlers
        .keys()
        .find(|name| HandlerKind::from_name(name).is_none())
    {
        Some(name) => Err(ValidationError::UnknownHandler { name: name.clone() }),
        None => Ok(()),
    }
}
