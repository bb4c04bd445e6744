//! Error taxonomy shared by every gateway component (§7).
//!
//! Component-level errors (`OtpError`, `OrchestratorError`, ...) carry
//! more specific tags; each converts into `GatewayError` at the
//! boundary where the HTTP layer needs a single, flat taxonomy to map
//! onto status codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("authentication error: {message}")]
    Authentication { message: String },

    #[error("rate limit exceeded")]
    RateLimit { retry_after_seconds: u64 },

    #[error("external service error")]
    ExternalService { service: String, detail: String },

    #[error("internal error")]
    Internal(String),
}

impl From<otp_store::StoreError> for GatewayError {
    fn from(err: otp_store::StoreError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
