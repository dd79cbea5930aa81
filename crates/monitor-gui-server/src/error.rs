//! Error types for the session server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use monitor_gui_core::{HandlerError, StorageError};
use serde::Serialize;

/// Outcomes of a dispatched call other than success.
///
/// The transport only distinguishes "invalid session" (start a new one) from
/// "invalid or unsupported request".
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid or unknown session")]
    InvalidSession,

    #[error("No handler for {0}")]
    UnresolvedHandler(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Handler aborted: {0}")]
    Aborted(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            DispatchError::InvalidSession => (StatusCode::NOT_FOUND, "INVALID_SESSION"),
            DispatchError::UnresolvedHandler(_) => (StatusCode::NOT_FOUND, "INVALID_REQUEST"),
            DispatchError::InvalidRequest(_) => (StatusCode::NOT_FOUND, "INVALID_REQUEST"),
            DispatchError::Handler(HandlerError::InvalidParameter { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_PARAMETER")
            }
            DispatchError::Handler(HandlerError::Unsupported) => {
                (StatusCode::NOT_FOUND, "UNSUPPORTED_REQUEST")
            }
            DispatchError::Handler(_) | DispatchError::Aborted(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "HANDLER_ERROR")
            }
            DispatchError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Errors while constructing the server context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("No workspaces configured")]
    NoWorkspaces,

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
