use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

tokio::task_local! {
    /// Request id for the in-flight request, scoped by the request middleware
    /// so error envelopes can echo it back.
    pub static REQUEST_ID: String;
}

fn current_request_id() -> String {
    REQUEST_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| "-".to_string())
}

// ==============================================================================
// Error codes
// ==============================================================================

pub mod codes {
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const INVALID_TYPE: &str = "INVALID_TYPE";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const TICKER_NOT_FOUND: &str = "TICKER_NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DUPLICATE_ENTRY: &str = "DUPLICATE_ENTRY";
    pub const AUTHENTICATION_FAILED: &str = "AUTHENTICATION_FAILED";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
    pub const DATA_PROVIDER_UNAVAILABLE: &str = "DATA_PROVIDER_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    error_code: &'static str,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<Vec<FieldError>>,
}

// ==============================================================================
// AppError
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ValidationFields(String, Vec<FieldError>),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Ticker not found: {0}")]
    TickerNotFound(String),
    #[error("{0}")]
    Duplicate(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("No data provider available: {0}")]
    ProviderUnavailable(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ValidationFields(..) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::TickerNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable(_) | AppError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Db(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::ValidationFields(..) => codes::VALIDATION_ERROR,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::TickerNotFound(_) => codes::TICKER_NOT_FOUND,
            AppError::Duplicate(_) => codes::DUPLICATE_ENTRY,
            AppError::RateLimited => codes::RATE_LIMIT_EXCEEDED,
            AppError::Provider(_) => codes::PROVIDER_ERROR,
            AppError::ProviderUnavailable(_) => codes::DATA_PROVIDER_UNAVAILABLE,
            AppError::ServiceUnavailable(_) => codes::SERVICE_UNAVAILABLE,
            AppError::PayloadTooLarge => codes::PAYLOAD_TOO_LARGE,
            AppError::Db(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();

        // Never leak SQL/internal details to clients.
        let message = match &self {
            AppError::Db(e) => {
                tracing::error!("database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let field_errors = match self {
            AppError::ValidationFields(_, fields) => Some(fields),
            _ => None,
        };

        let body = ErrorEnvelope {
            error: message,
            error_code: code,
            request_id: current_request_id(),
            field_errors,
        };

        (status, Json(body)).into_response()
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("alert".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::PayloadTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            AppError::TickerNotFound("ZZZZ".into()).code(),
            codes::TICKER_NOT_FOUND
        );
        assert_eq!(
            AppError::Duplicate("dup".into()).code(),
            codes::DUPLICATE_ENTRY
        );
        assert_eq!(
            AppError::ProviderUnavailable("all down".into()).code(),
            codes::DATA_PROVIDER_UNAVAILABLE
        );
    }
}
