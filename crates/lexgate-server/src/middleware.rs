use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::rate_limit::{Admission, AdmissionGuard, ForwardedTrust, RatePolicy, RequestIdentity};

// =============================================================================
// Rate Limit Middleware
// =============================================================================

/// Guard plus the policy for the routes a layer is attached to.
#[derive(Clone)]
pub struct RateLimitState {
    guard: Arc<AdmissionGuard>,
    policy: Option<Arc<RatePolicy>>,
    trust: ForwardedTrust,
}

impl RateLimitState {
    pub fn new(guard: Arc<AdmissionGuard>, policy: RatePolicy) -> Self {
        Self {
            guard,
            policy: Some(Arc::new(policy)),
            trust: ForwardedTrust::Disabled,
        }
    }

    /// State for public routes: nothing is counted.
    pub fn public(guard: Arc<AdmissionGuard>) -> Self {
        Self {
            guard,
            policy: None,
            trust: ForwardedTrust::Disabled,
        }
    }

    /// Accept `X-Forwarded-For` from the peers `trust` allows.
    pub fn with_forwarded_trust(mut self, trust: ForwardedTrust) -> Self {
        self.trust = trust;
        self
    }
}

/// Rate limiting middleware.
///
/// Resolves the caller from the `Principal` extension and the socket address
/// (or `X-Forwarded-For` from a trusted proxy), then:
/// 1. Passes the request through untouched when no policy applies
/// 2. Adds `X-RateLimit-*` headers to admitted responses
/// 3. Answers 429 with `Retry-After` when the window is full
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identity = RequestIdentity::from_parts(req.headers(), req.extensions(), &state.trust);

    match state.guard.check(state.policy.as_deref(), &identity).await {
        Ok(Admission::Skipped) => next.run(req).await,
        Ok(Admission::Admitted(quota)) => {
            let mut response = next.run(req).await;
            quota.apply_headers(response.headers_mut());
            response
        }
        Err(e) => {
            tracing::debug!(
                path = %req.uri().path(),
                identifier = %identity.identifier(),
                error = %e,
                "request rejected by admission guard"
            );
            e.into_response()
        }
    }
}
