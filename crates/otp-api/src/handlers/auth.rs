//! Phone, email, and session-restore handlers (§6/§4.7).
//!
//! Each handler is thin glue: deserialize, call into
//! `AuthOrchestrator`, shape the response. All correctness lives in
//! `otp-core`; `ApiError`'s `From<OrchestratorError>` impl does the
//! tag-to-status mapping (§9: "the HTTP layer is the single site that
//! converts tags to status codes").

use axum::{extract::State, Json};
use otp_core::services::orchestrator::SessionSnapshot;
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SmsSendRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct SmsSendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

pub async fn sms_send(State(state): State<AppState>, Json(body): Json<SmsSendRequest>) -> Result<Json<SmsSendResponse>, ApiError> {
    let outcome = state.orchestrator.request_phone_code(&body.phone).await?;
    Ok(Json(SmsSendResponse { success: outcome.success, cooldown_seconds: outcome.cooldown_seconds }))
}

#[derive(Debug, Deserialize)]
pub struct SmsVerifyRequest {
    pub phone: String,
    pub code: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipass_url: Option<String>,
}

pub async fn sms_verify(State(state): State<AppState>, Json(body): Json<SmsVerifyRequest>) -> Result<Json<AuthResponse>, ApiError> {
    let outcome = state.orchestrator.verify_phone_code(&body.phone, &body.code, body.return_to).await?;
    Ok(Json(AuthResponse { success: outcome.success, multipass_url: outcome.sso_url }))
}

#[derive(Debug, Deserialize)]
pub struct EmailLoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

pub async fn email_login(State(state): State<AppState>, Json(body): Json<EmailLoginRequest>) -> Result<Json<AuthResponse>, ApiError> {
    let outcome = state.orchestrator.email_login(&body.email, &body.password, body.return_to).await?;
    Ok(Json(AuthResponse { success: outcome.success, multipass_url: outcome.sso_url }))
}

/// §3: `SessionSnapshot` is client-held and the core "neither stores
/// nor trusts it beyond echo". It carries no customer identifier of
/// its own, so the boundary DTO also carries `customer_ref` — the
/// session-restore caller already knows which customer it is
/// refreshing (e.g. from its own short-lived cookie), a detail §6
/// leaves unspecified and which this handler resolves by widening the
/// request body rather than inventing state in `otp-core`.
#[derive(Debug, Deserialize)]
pub struct SessionRestoreRequest {
    pub customer_ref: String,
    pub session_snapshot: SessionSnapshotDto,
}

#[derive(Debug, Deserialize)]
pub struct SessionSnapshotDto {
    pub checkout_url: Option<String>,
    pub timestamp_ms: i64,
    pub cart_token: Option<String>,
}

impl From<SessionSnapshotDto> for SessionSnapshot {
    fn from(dto: SessionSnapshotDto) -> Self {
        SessionSnapshot { checkout_url: dto.checkout_url, timestamp_ms: dto.timestamp_ms, cart_token: dto.cart_token }
    }
}

pub async fn session_restore(State(state): State<AppState>, Json(body): Json<SessionRestoreRequest>) -> Result<Json<AuthResponse>, ApiError> {
    let outcome = state.orchestrator.restore_session(&body.customer_ref, body.session_snapshot.into()).await?;
    Ok(Json(AuthResponse { success: outcome.success, multipass_url: outcome.sso_url }))
}
