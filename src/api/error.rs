use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::handlers::{RegistryError, ValidationError};
use crate::ledger::LedgerError;
use crate::pipeline::{PipelineError, QueueError};
use crate::settings::SettingsError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Validation(ValidationError),
    #[error("unknown handler: {0}")]
    UnknownHandler(String),
    #[error("{0}")]
    HandlerUnavailable(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("entry {0} is already being enriched")]
    InFlight(String),
    #[error("enrichment queue unavailable: {0}")]
    QueueUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::UnknownHandler(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::HandlerUnavailable(_) | ApiError::InFlight(_) => StatusCode::CONFLICT,
            ApiError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::UnknownHandler(_) => "UNKNOWN_HANDLER",
            ApiError::HandlerUnavailable(_) => "HANDLER_UNAVAILABLE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InFlight(_) => "ENRICHMENT_IN_FLIGHT",
            ApiError::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            fields: match &self {
                ApiError::Validation(e) => e.errors.clone(),
                _ => Vec::new(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        ApiError::Validation(value)
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        ApiError::Internal(format!("ledger: {value}"))
    }
}

impl From<RegistryError> for ApiError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::UnknownHandler(name) => ApiError::UnknownHandler(name),
            e @ RegistryError::HandlerUnavailable { .. } => ApiError::HandlerUnavailable(e.to_string()),
            RegistryError::Validation(e) => ApiError::Validation(e),
            RegistryError::Build(e) => ApiError::InvalidPayload(format!("handler rejected config: {e}")),
            RegistryError::Ledger(e) => e.into(),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(value: SettingsError) -> Self {
        match value {
            SettingsError::Validation(e) => ApiError::Validation(e),
            SettingsError::Handler(e) => e.into(),
            SettingsError::Ledger(e) => e.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::EntryNotFound(id) => ApiError::NotFound(format!("entry {id}")),
            PipelineError::AlreadyInFlight(id) => ApiError::InFlight(id),
            PipelineError::Store(e) => e.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        ApiError::QueueUnavailable(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{FieldProblem, HandlerCategory};

    #[test]
    fn test_registry_errors_map_to_statuses() {
        let unknown: ApiError = RegistryError::UnknownHandler("pigeon".into()).into();
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(unknown.code(), "UNKNOWN_HANDLER");

        let unavailable: ApiError = RegistryError::HandlerUnavailable {
            category: HandlerCategory::Summarization,
            name: "openai".into(),
        }
        .into();
        assert_eq!(unavailable.status_code(), StatusCode::CONFLICT);
        assert_eq!(unavailable.code(), "HANDLER_UNAVAILABLE");
    }

    #[test]
    fn test_validation_keeps_field_errors() {
        let error: ApiError = SettingsError::Validation(ValidationError::single(
            "settings",
            "reading_speed",
            FieldProblem::OutOfRange {
                bound: "must be between 1 and 2000".into(),
            },
        ))
        .into();

        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        match error {
            ApiError::Validation(e) => assert!(e.has_problem("reading_speed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_errors() {
        let missing: ApiError = PipelineError::EntryNotFound("e1".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let busy: ApiError = PipelineError::AlreadyInFlight("e1".into()).into();
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);
    }
}
