//! Error type returned by route handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatlog_common::ErrorBody;

use crate::auth::AuthError;
use crate::llm::CompletionError;
use crate::store::StoreError;

/// Unified API error type for all route handlers.
///
/// Authentication failures become 401 with a stable `code`; everything not
/// caused by the caller is logged here and reported as a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Auth(e) if e.is_unauthorized() => {
                tracing::warn!(code = e.code(), "Authentication failed: {}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorBody {
                        error: e.public_message().to_string(),
                        code: Some(e.code().to_string()),
                    },
                )
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: msg.clone(),
                    code: None,
                },
            ),
            ApiError::Auth(_) | ApiError::Store(_) | ApiError::Completion(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Internal server error".to_string(),
                        code: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
