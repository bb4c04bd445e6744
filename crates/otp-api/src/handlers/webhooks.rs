//! SMS delivery-receipt intake (§6: `POST /api/webhooks/sms-dlr`).
//!
//! §9 Open Questions: DLR HMAC validation is applied inconsistently
//! across providers in the source this spec was distilled from; this
//! gateway verifies body-mode HMAC (§4.9) whenever the named provider
//! has a configured webhook secret, and otherwise logs the payload as
//! unauthenticated rather than trusting it.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use otp_crypto::verify_body_hmac;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{error::ApiError, AppState};

const DLR_HMAC_HEADER: &str = "x-webhook-hmac-sha256";

#[derive(Debug, Deserialize)]
pub struct DlrQuery {
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct DlrResponse {
    pub success: bool,
}

pub async fn sms_dlr(
    State(state): State<AppState>,
    Query(query): Query<DlrQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DlrResponse>, ApiError> {
    let adapter = state
        .sms_router
        .providers()
        .iter()
        .find(|p| p.name() == query.provider)
        .ok_or_else(|| ApiError::Validation(format!("unknown sms provider: {}", query.provider)))?;

    if let Some(secret) = state.webhook_secrets.get(query.provider.as_str()) {
        let supplied = headers.get(DLR_HMAC_HEADER).and_then(|v| v.to_str().ok());
        if verify_body_hmac(secret, &body, supplied).is_err() {
            return Err(ApiError::Authentication("delivery receipt signature is missing or invalid".to_string()));
        }
    } else {
        warn!(provider = %query.provider, "sms delivery receipt has no configured webhook secret, trusting unauthenticated payload");
    }

    let payload = std::str::from_utf8(&body).map_err(|e| ApiError::Validation(format!("payload is not valid utf-8: {e}")))?;
    let Some(receipt) = adapter.parse_receipt(payload) else {
        return Err(ApiError::Validation("delivery receipt payload could not be parsed".to_string()));
    };

    state.sms_router.update_delivery(&receipt.message_id, receipt.status, receipt.failure_reason).await;
    Ok(Json(DlrResponse { success: true }))
}
