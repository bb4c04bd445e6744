//! Merchant settings endpoints (§6: `GET`/`PUT /api/admin/settings`, §4.10/C10).

use axum::{extract::State, Json};
use otp_core::services::settings::ShopSettings;

use crate::{error::ApiError, AppState};

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<ShopSettings>, ApiError> {
    let settings = state.settings.get().await?;
    Ok(Json(settings))
}

pub async fn update_settings(State(state): State<AppState>, Json(body): Json<ShopSettings>) -> Result<Json<ShopSettings>, ApiError> {
    state.settings.update(body.clone()).await?;
    Ok(Json(body))
}
