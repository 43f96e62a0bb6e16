use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum PilotError {
    /// Startup configuration problem; fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// A credential is neither in the session nor configured.
    #[error("{0} is required. Please set it in settings")]
    MissingSetting(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("request body too large")]
    BodyTooLarge,

    #[error("Unsafe SQL detected")]
    UnsafeSql,

    /// Dry-run rejection, carrying the store's message verbatim.
    #[error("{0}")]
    InvalidSql(String),

    #[error("model request failed: {0}")]
    ModelRequest(#[from] reqwest::Error),

    #[error("model service returned {status}: {message}")]
    ModelStatus { status: StatusCode, message: String },

    #[error("model response did not match the expected format: {0}")]
    MalformedOutput(String),

    #[error("{}", store_message(.0))]
    Store(#[from] SqlxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl PilotError {
    /// Errors the caller may resolve by simply asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PilotError::ModelRequest(_)
                | PilotError::ModelStatus { .. }
                | PilotError::MalformedOutput(_)
        )
    }

    /// Reclassify a store failure raised during a dry run as a validation failure.
    pub fn into_validation(self) -> Self {
        match self {
            PilotError::Store(e) => PilotError::InvalidSql(store_message(&e)),
            other => other,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PilotError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION"),
            PilotError::MissingSetting(_) => (StatusCode::BAD_REQUEST, "MISSING_SETTING"),
            PilotError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            PilotError::BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            PilotError::UnsafeSql => (StatusCode::BAD_REQUEST, "UNSAFE_SQL"),
            PilotError::InvalidSql(_) => (StatusCode::BAD_REQUEST, "INVALID_SQL"),
            PilotError::ModelRequest(_)
            | PilotError::ModelStatus { .. }
            | PilotError::MalformedOutput(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SYNTHESIS_FAILED")
            }
            PilotError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "EXECUTION_FAILED"),
            PilotError::Json(_) | PilotError::UrlParse(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

/// Message text of a store error; database errors yield the server's own wording.
pub fn store_message(e: &SqlxError) -> String {
    match e {
        SqlxError::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for PilotError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            PilotError::Json(_) | PilotError::UrlParse(_) | PilotError::Config(_) => {
                "An internal server error occurred.".to_string()
            }
            other => other.to_string(),
        };
        let body = ApiErrorResponse {
            error: message,
            code,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}
