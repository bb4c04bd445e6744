//! HTTP error taxonomy (§7): every component error converges here and
//! is rendered as `{success: false, error: {code, message}}`.
//!
//! `ExternalService` never forwards the upstream detail to the
//! caller — only the sanitized, generic message is exposed — and
//! `RateLimit` sets `Retry-After` directly rather than through the
//! JSON body.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

pub mod problem_details;

use otp_core::services::orchestrator::OrchestratorError;
use otp_core::services::settings::SettingsError;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Authentication(String),
    RateLimit { retry_after_seconds: u64 },
    ExternalService(String),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Authentication(_) => "AUTHENTICATION_ERROR",
            ApiError::RateLimit { .. } => "RATE_LIMIT_ERROR",
            ApiError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(m) | ApiError::Authentication(m) => m.clone(),
            ApiError::RateLimit { retry_after_seconds } => format!("rate limit exceeded, retry in {retry_after_seconds}s"),
            // §7: upstream detail MUST NOT leak outward.
            ApiError::ExternalService(_) => "an upstream service is currently unavailable".to_string(),
            ApiError::Internal(_) => "an internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            error!(detail, "internal error");
        }
        if let ApiError::ExternalService(detail) = &self {
            error!(detail, "external service error");
        }

        let status = self.status();
        let retry_after = match &self {
            ApiError::RateLimit { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        };

        let body = ErrorEnvelope { success: false, error: ErrorBody { code: self.code(), message: self.message() } };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidInput(message) => ApiError::Validation(message),
            OrchestratorError::MethodDisabled => ApiError::Validation("authentication method is disabled".to_string()),
            OrchestratorError::Blocked => ApiError::Authentication("identity is temporarily blocked".to_string()),
            OrchestratorError::CooldownActive { retry_after_secs } => ApiError::RateLimit { retry_after_seconds: retry_after_secs },
            OrchestratorError::SendRateExceeded { retry_after_secs } => ApiError::RateLimit { retry_after_seconds: retry_after_secs },
            OrchestratorError::BadCredentials => ApiError::Authentication("invalid credentials".to_string()),
            OrchestratorError::ProviderError(detail) => ApiError::ExternalService(detail),
            OrchestratorError::DirectoryError(detail) => ApiError::ExternalService(detail),
            OrchestratorError::MintError(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::AllMethodsDisabled => ApiError::Validation(err.to_string()),
            SettingsError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<otp_store::StoreError> for ApiError {
    fn from(err: otp_store::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
