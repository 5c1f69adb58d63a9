use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::gateway::registry::SessionPhase;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// HTTP-edge error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Failures of the engagement pipeline.
///
/// Each variant is handled where it is detected. None of them may end a
/// connection task or leak into another session's work.
#[derive(Debug, thiserror::Error)]
pub enum EngageError {
    /// An inbound sample or lifecycle event did not decode.
    #[error("malformed payload: {0}")]
    Parse(String),

    /// A lifecycle or data event named a session that is not registered.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A creation event named a session that is already registered.
    #[error("session already registered: {0}")]
    DuplicateSession(String),

    /// A lifecycle event arrived for a session in the wrong phase.
    #[error("session {session_id} cannot leave phase {phase:?}")]
    InvalidTransition {
        session_id: String,
        phase: SessionPhase,
    },

    /// A store read or write failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The generative-text call failed, timed out, or returned nothing.
    #[error("text generation failed: {0}")]
    Oracle(String),

    /// An outbound payload could not be serialized.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The call provider rejected or failed a request.
    #[error("call provider request failed: {0}")]
    CallProvider(String),
}

impl From<diesel::result::Error> for EngageError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for EngageError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<EngageError> for ApiError {
    fn from(err: EngageError) -> Self {
        match err {
            EngageError::Parse(message) => Self::bad_request(message),
            EngageError::UnknownSession(id) => Self::not_found(format!("Unknown session {id}")),
            other => {
                tracing::error!(err = %other, "engagement pipeline error");
                Self::internal("An internal error occurred")
            }
        }
    }
}
