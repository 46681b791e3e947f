//! Error types for the HTTP API and server lifecycle.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::settings::SettingsError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the REST endpoints
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid request parameters
    #[error("{0}")]
    BadRequest(String),

    /// The cluster or kubeconfig could not be queried
    #[error("{0}")]
    Kubernetes(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Wrap a cluster failure with what was being attempted
    pub fn kubernetes(action: &str, err: anyhow::Error) -> Self {
        Self::Kubernetes(format!("{}: {:#}", action, err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Kubernetes(_) => (StatusCode::INTERNAL_SERVER_ERROR, "kubernetes_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error,
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Errors starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
