//! JSON error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ratio_trading::SessionError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    BadRequest(String),
}

/// Error body: `{ "error": "...", "kind": "..." }`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(e) => match e.kind() {
                "invalid_request" | "below_minimum" | "no_provider" | "not_connected"
                | "wrong_chain" => StatusCode::BAD_REQUEST,
                "auth_rejected" | "auth_expired" | "signature_rejected" | "connection_rejected" => {
                    StatusCode::UNAUTHORIZED
                }
                "agent_not_approved" | "session_changed" => StatusCode::CONFLICT,
                "store" => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            ApiError::BadRequest(message) => ErrorResponse {
                error: message.clone(),
                kind: "invalid_request",
            },
            ApiError::Session(e) => ErrorResponse {
                error: e.user_message(),
                kind: e.kind(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
