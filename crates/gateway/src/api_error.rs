//! HTTP mapping for engine and pairing errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::pairing;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthorized,

    #[error("pairing session not found")]
    SessionNotFound,

    #[error("pairing session expired")]
    PairingExpired,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<courier_ingest::Error> for ApiError {
    fn from(e: courier_ingest::Error) -> Self {
        match e {
            courier_ingest::Error::MalformedEvent { reason } => Self::BadRequest(reason),
            e if e.is_retryable() => Self::StoreUnavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<pairing::Error> for ApiError {
    fn from(e: pairing::Error) -> Self {
        match e {
            pairing::Error::SessionNotFound => Self::SessionNotFound,
            pairing::Error::PairingExpired => Self::PairingExpired,
            e @ pairing::Error::Store { .. } => Self::StoreUnavailable(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "not authenticated"}),
            ),
            Self::SessionNotFound => (
                StatusCode::NOT_FOUND,
                serde_json::json!({"error": "not_found"}),
            ),
            Self::PairingExpired => (StatusCode::GONE, serde_json::json!({"error": "expired"})),
            Self::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": reason}),
            ),
            Self::StoreUnavailable(detail) => {
                tracing::warn!(error = %detail, "store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({"error": "store unavailable", "retryable": true}),
                )
            },
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"error": "internal error"}),
                )
            },
        };
        (status, Json(body)).into_response()
    }
}
