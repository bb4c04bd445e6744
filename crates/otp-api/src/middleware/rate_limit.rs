use axum::{
    extract::ConnectInfo,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
};
use otp_core::services::rate_limiter::{Admission, RateLimiter};
use std::{net::SocketAddr, sync::Arc};

/// Fixed-window rate limiting keyed by client IP and request path.
///
/// The limiter itself lives in `otp-core` (backed by `KeyedStore`, so
/// counters are shared across instances when Redis is configured);
/// this middleware only extracts the connecting address and renders
/// denial as an HTTP response.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let limiter = req.extensions().get::<Arc<RateLimiter>>().cloned();

    if let Some(limiter) = limiter {
        let ip = addr.ip().to_string();
        let path = req.uri().path().to_string();

        match limiter.check(&ip, &path).await {
            Admission::Allowed => {}
            Admission::Denied { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate limit exceeded, please try again later",
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert("retry-after", value);
                }
                return response;
            }
        }
    }

    next.run(req).await
}
