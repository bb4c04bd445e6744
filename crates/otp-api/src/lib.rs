//! HTTP API layer for the multi-channel customer authentication
//! gateway (§6). Thin glue only: handlers deserialize requests, call
//! into `otp-core`, and let `ApiError` shape the response — all
//! correctness-critical logic lives below this crate.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use otp_core::oauth::OAuthProviderKind;
use otp_core::services::orchestrator::AuthOrchestrator;
use otp_core::services::rate_limiter::RateLimiter;
use otp_core::services::settings::SettingsProvider;
use otp_core::services::sms_router::SmsRouter;
use otp_store::KeyedStore;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod validation;

/// Everything a handler needs, cloned cheaply per-request (every field
/// is an `Arc` or already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AuthOrchestrator>,
    pub settings: Arc<SettingsProvider>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sms_router: Arc<SmsRouter>,
    pub store: Arc<dyn KeyedStore>,
    /// Per-provider-name webhook secret for §4.9 body-mode DLR HMAC
    /// verification; absent entries are logged unauthenticated (§9).
    pub webhook_secrets: HashMap<String, String>,
    /// Redirect URI registered with each configured OAuth provider.
    pub oauth_redirect_uris: HashMap<OAuthProviderKind, String>,
}

pub fn app(state: AppState) -> Router {
    router::api_router(state.rate_limiter.clone())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
