//! Errors that cross the admission boundary and their HTTP rendering.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use lexgate_core::{EpochMillis, time::format_millis};
use lexgate_storage::StoreError;
use serde_json::json;

use crate::rate_limit::Quota;

/// Machine-readable code carried in a rate-limit denial body.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The caller's window is full.
    #[error("Too many requests. Please try again later.")]
    RateLimitExceeded {
        limit: u32,
        remaining: u32,
        reset_at: EpochMillis,
        retry_after_secs: u64,
    },

    /// The store failed and the limiter is configured to fail closed.
    #[error("Rate limiting is temporarily unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => RATE_LIMIT_EXCEEDED,
            Self::StoreUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        match self {
            Self::RateLimitExceeded {
                limit,
                remaining,
                reset_at,
                retry_after_secs,
            } => {
                let body = json!({
                    "error": message,
                    "code": RATE_LIMIT_EXCEEDED,
                    "details": {
                        "limit": limit,
                        "remaining": remaining,
                        "resetAt": reset_at,
                        "resetTime": format_millis(reset_at),
                        "retryAfter": retry_after_secs,
                    }
                });
                let mut response = (status, Json(body)).into_response();
                let quota = Quota {
                    limit,
                    remaining,
                    reset_at,
                    degraded: false,
                };
                quota.apply_headers(response.headers_mut());
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            Self::StoreUnavailable(e) => {
                tracing::error!(error = %e, "rate limit store unavailable, rejecting request");
                let body = json!({
                    "error": message,
                    "code": "SERVICE_UNAVAILABLE",
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
