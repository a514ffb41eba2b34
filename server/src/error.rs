//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quarry_engine::Error;
use serde::{Deserialize, Serialize};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Sync is not enabled on this server")]
    SyncDisabled,
}

/// Error response body.
///
/// `kind` is the machine-readable error name, which lets remote clients map
/// the response back onto the error it was rendered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl ErrorBody {
    /// Rebuild the engine error a remote server reported.
    ///
    /// Filter errors lose their structured fields in transit and come back
    /// as configuration errors carrying the original message. The prefix the
    /// rebuilt variant adds when displayed is stripped from the message.
    pub fn into_error(self) -> Error {
        let Self { error, kind } = self;
        match kind.as_str() {
            "not_found" => Error::NotFound(bare(error, "record not found: ")),
            "duplicate_key" => Error::DuplicateKey(bare(error, "duplicate key: ")),
            "configuration" => Error::Configuration(bare(error, "configuration error: ")),
            "invalid_value" | "unsupported_operator" | "bad_request" => Error::Configuration(error),
            _ => Error::Transport(bare(error, "transport error: ")),
        }
    }
}

fn bare(message: String, prefix: &str) -> String {
    match message.strip_prefix(prefix) {
        Some(rest) => rest.to_string(),
        None => message,
    }
}

/// Status code for an engine error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Configuration(_) | Error::InvalidValue { .. } | Error::UnsupportedOperator { .. } => {
            StatusCode::BAD_REQUEST
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateKey(_) => StatusCode::CONFLICT,
        Error::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::Engine(e) => {
                let status = status_for(e);
                if status.is_server_error() {
                    tracing::error!("Storage error: {}", e);
                } else {
                    tracing::warn!("Request rejected: {}", e);
                }
                (status, e.kind())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::SyncDisabled => (StatusCode::NOT_FOUND, "sync_disabled"),
        };

        let body = Json(ErrorBody {
            error: self.to_string(),
            kind: kind.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
