//! Shared HTTP plumbing for the built-in handlers

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use super::traits::HandlerError;

pub const USER_AGENT: &str = concat!("Gleaner/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }
}

pub fn build_client(config: &HttpConfig) -> Result<Client, HandlerError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| HandlerError::Build(e.to_string()))
}

/// Turn a non-2xx response into [`HandlerError::Status`]
pub async fn ensure_success(response: Response) -> Result<Response, HandlerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        truncate(body.trim(), 200)
    };

    debug!(status = status.as_u16(), %message, "Upstream rejected request");
    Err(HandlerError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Read the body as text, refusing anything larger than `max_bytes`
pub async fn read_limited(mut response: Response, max_bytes: usize) -> Result<String, HandlerError> {
    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            return Err(HandlerError::InvalidResponse(format!(
                "body of {length} bytes exceeds limit of {max_bytes}"
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(HandlerError::InvalidResponse(format!(
                "body exceeds limit of {max_bytes} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(config.user_agent.starts_with("Gleaner/"));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }
}
