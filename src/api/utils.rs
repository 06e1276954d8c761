//! API utility functions
//!
//! Request-body helpers shared by the JSON endpoints.

use axum::body::Body;
use axum::http::{HeaderMap, header::CONTENT_TYPE};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` with or without parameters; rejects
/// look-alikes such as `application/jsonp` or `text/json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Read a JSON request body of at most `max_size` bytes.
///
/// Decompression already happened in `RequestDecompressionLayer`, so the
/// limit applies to the decoded payload.
pub async fn read_json<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: Body,
    max_size: usize,
) -> Result<T, ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    // One byte over the limit is enough to tell the payload is too large
    let data = Limited::new(body, max_size + 1)
        .collect()
        .await
        .map_err(|err| {
            if err.is::<LengthLimitError>() {
                ApiError::PayloadTooLarge(max_size + 1)
            } else {
                ApiError::InvalidPayload(err.to_string())
            }
        })?
        .to_bytes();
    validate_body_size(&data, max_size)?;

    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::Value;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    #[test]
    fn test_parse_content_type_valid() {
        assert!(parse_content_type("application/json").is_ok());
        assert!(parse_content_type("application/json; charset=utf-8").is_ok());
    }

    #[test]
    fn test_parse_content_type_invalid() {
        assert!(parse_content_type("application/jsonp").is_err());
        assert!(parse_content_type("text/json").is_err());
        assert!(parse_content_type("invalid").is_err());
        assert!(parse_content_type("").is_err());
    }

    #[test]
    fn test_validate_body_size_too_large() {
        let data = vec![0u8; 1000];
        assert!(validate_body_size(&data, 1000).is_ok());
        assert!(matches!(
            validate_body_size(&data, 999),
            Err(ApiError::PayloadTooLarge(1000))
        ));
    }

    #[tokio::test]
    async fn test_read_json() {
        let value: Value = read_json(&json_headers(), Body::from(r#"{"theme":"nord"}"#), 1024)
            .await
            .unwrap();
        assert_eq!(value["theme"], "nord");
    }

    #[tokio::test]
    async fn test_read_json_rejects_missing_content_type() {
        let result: Result<Value, _> = read_json(&HeaderMap::new(), Body::from("{}"), 1024).await;
        assert!(matches!(result, Err(ApiError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_read_json_rejects_oversized_body() {
        let body = format!(r#"{{"padding":"{}"}}"#, "x".repeat(200));
        let result: Result<Value, _> = read_json(&json_headers(), Body::from(body), 64).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge(_))));
    }
}
