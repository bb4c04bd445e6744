use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use otp_core::services::rate_limiter::RateLimiter;

use crate::handlers::{admin, auth, health, oauth, webhooks};
use crate::middleware::{rate_limit_middleware, request_id_middleware, security_headers_middleware};
use crate::AppState;

/// Wires every path in §6's HTTP surface table, layered
/// bottom-to-top: tracing (added by the caller in `app()`), security
/// headers, request-id, then the rate-limit gate closest to the
/// handlers so it sees the resolved path.
pub fn api_router(rate_limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/auth/sms/send", post(auth::sms_send))
        .route("/api/auth/sms/verify", post(auth::sms_verify))
        .route("/api/auth/email/login", post(auth::email_login))
        .route("/api/auth/session/restore", post(auth::session_restore))
        .route("/api/auth/oauth/:provider", get(oauth::login))
        .route("/api/auth/oauth/:provider/callback", get(oauth::callback))
        .route("/api/webhooks/sms-dlr", post(webhooks::sms_dlr))
        .route("/api/admin/settings", get(admin::get_settings).put(admin::update_settings))
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(axum::Extension(rate_limiter))
}
