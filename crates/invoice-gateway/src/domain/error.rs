//! Error types for the HTTP gateway
//!
//! Every failure leaves the gateway as
//! `{"error": {"code": "<snake_case>", "message": "..."}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hold_invoice::{GatewayError, LifecycleError};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::warn;

/// Gateway service errors (startup and serving)
#[derive(Debug, thiserror::Error)]
pub enum GatewayServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Error returned to HTTP clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "request_timeout", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// JSON body for this error
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = self.code, status = %self.status, message = %self.message, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let status = match &err {
            LifecycleError::InvalidAmount { .. }
            | LifecycleError::InvalidRequest(_)
            | LifecycleError::SecretMismatch { .. } => StatusCode::BAD_REQUEST,
            LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
            LifecycleError::AlreadyWatching { .. }
            | LifecycleError::AlreadyTerminal { .. }
            | LifecycleError::Cancelled { .. } => StatusCode::CONFLICT,
            LifecycleError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            LifecycleError::SubscriptionClosed { .. } | LifecycleError::Node { .. } => {
                StatusCode::BAD_GATEWAY
            }
            LifecycleError::NodeUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LifecycleError::Entropy(_) | LifecycleError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.code(), err.to_string())
    }
}

/// Wallet passthrough failures
impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let (status, code) = match &err {
            GatewayError::NodeUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "node_unavailable")
            }
            GatewayError::InvalidParameters(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::SecretMismatch => (StatusCode::BAD_REQUEST, "secret_mismatch"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::AlreadySettled | GatewayError::AlreadyTerminal(_) => {
                (StatusCode::CONFLICT, "already_terminal")
            }
            GatewayError::Node(_) => (StatusCode::BAD_GATEWAY, "node_error"),
        };
        Self::new(status, code, err.to_string())
    }
}
