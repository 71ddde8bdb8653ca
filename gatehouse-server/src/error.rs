//! Request-visible error taxonomy.
//!
//! Validation and configuration errors abort a request before any state
//! mutation. Upstream timeouts and rate limits map to 503 (safe to
//! retry); upstream auth rejections map to 502 and are surfaced
//! distinctly. Side-effect failures after a committed status transition
//! never travel through this type: they are logged, recorded on the
//! record and surfaced via the retry command.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use gatehouse_core::ValidationError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatehouseError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("Timed out talking to {0}")]
    UpstreamTimeout(&'static str),

    #[error("Discord rate limit, try again shortly")]
    RateLimited,

    #[error("Upstream rejected the request: {0}")]
    UpstreamAuth(String),

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatehouseError {
    fn status(&self) -> StatusCode {
        match self {
            GatehouseError::Validation(_) => StatusCode::BAD_REQUEST,
            GatehouseError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatehouseError::UpstreamTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatehouseError::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            GatehouseError::UpstreamAuth(_) => StatusCode::BAD_GATEWAY,
            GatehouseError::NotFound => StatusCode::NOT_FOUND,
            GatehouseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a reqwest failure for the named upstream operation.
    pub fn from_reqwest(err: reqwest::Error, upstream: &'static str) -> Self {
        if err.is_timeout() || err.is_connect() {
            GatehouseError::UpstreamTimeout(upstream)
        } else {
            GatehouseError::Internal(anyhow::Error::new(err).context(upstream))
        }
    }

    /// Map a non-success upstream HTTP status.
    pub fn from_status(status: reqwest::StatusCode, upstream: &'static str, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            GatehouseError::RateLimited
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            GatehouseError::UpstreamAuth(format!("{}: {}", upstream, status))
        } else {
            GatehouseError::Internal(anyhow::anyhow!(
                "{} request failed: {} - {}",
                upstream,
                status,
                body
            ))
        }
    }
}

impl IntoResponse for GatehouseError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay in the logs
            GatehouseError::Internal(err) => {
                tracing::error!("request failed: {:#}", err);
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}
