//! OAuth authorization-redirect and callback handlers (§6/§4.7).
//!
//! The CSRF `state` parameter is validated here, at the HTTP boundary
//! — not inside `AuthOrchestrator` — per §4.7: "the state parameter is
//! validated by the HTTP boundary, not the orchestrator". State tokens
//! live in `KeyedStore` with a short TTL so a login attempt that is
//! never completed simply expires.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};
use otp_core::oauth::{generate_csrf_state, OAuthProviderKind};
use otp_store::KeyedStore;
use serde::Deserialize;

use crate::{error::ApiError, AppState};

const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

fn parse_provider(name: &str) -> Result<OAuthProviderKind, ApiError> {
    match name {
        "google" => Ok(OAuthProviderKind::Google),
        other => Err(ApiError::Validation(format!("unsupported oauth provider: {other}"))),
    }
}

fn state_key(state: &str) -> String {
    format!("oauth:state:{state}")
}

#[derive(Debug, Deserialize)]
pub struct OAuthLoginQuery {
    #[serde(default)]
    pub return_to: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(_query): Query<OAuthLoginQuery>,
) -> Result<Redirect, ApiError> {
    let provider = parse_provider(&provider)?;
    let redirect_uri = state
        .oauth_redirect_uris
        .get(&provider)
        .cloned()
        .ok_or_else(|| ApiError::Validation("oauth provider is not configured".to_string()))?;

    let csrf_state = generate_csrf_state();
    state.store.set_raw_if_absent(&state_key(&csrf_state), "1".to_string(), OAUTH_STATE_TTL).await?;

    let authorization_url = state.orchestrator.oauth_authorization_url(provider, &csrf_state, &redirect_uri)?;
    Ok(Redirect::to(&authorization_url))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
    pub state: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

pub async fn callback(
    State(app_state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let provider = parse_provider(&provider)?;

    let state_existed = app_state.store.exists(&state_key(&query.state)).await?;
    if !state_existed {
        return Err(ApiError::Authentication("oauth state is invalid or expired".to_string()));
    }
    app_state.store.del(&state_key(&query.state)).await?;

    let redirect_uri = app_state
        .oauth_redirect_uris
        .get(&provider)
        .cloned()
        .ok_or_else(|| ApiError::Validation("oauth provider is not configured".to_string()))?;

    let outcome = app_state.orchestrator.oauth_callback(provider, &query.code, &redirect_uri, query.return_to).await?;
    let sso_url = outcome.sso_url.ok_or_else(|| ApiError::Internal("oauth callback succeeded without a minted url".to_string()))?;
    Ok(Redirect::to(&sso_url))
}
