use std::num::NonZeroU32;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::util::extract_client_ip;

/// Per-client request quota, keyed by IP address.
pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl ClientRateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

/// Reject requests beyond the client's quota with 429.
///
/// Requests without proxy headers share a single bucket.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let client = extract_client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());
    if !state.rate_limiter.check(&client) {
        tracing::warn!("Rate limit exceeded for {}", client);
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}
