//! Configuration validation beyond what `validator` derives express.

use crate::config::AppConfig;
use secrecy::ExposeSecret;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationErrors),

    #[error("security validation failed: {message}")]
    SecurityValidationFailed { message: String },

    #[error("provider validation failed: {message}")]
    ProviderValidationFailed { message: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        config.validate()?;
        Self::validate_security_config(config)?;
        Self::validate_provider_config(config)?;
        Ok(())
    }

    fn validate_security_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.shopify.multipass_secret.expose_secret().len() < 16 {
            return Err(ConfigValidationError::SecurityValidationFailed {
                message: "multipass secret must be at least 16 characters long".to_string(),
            });
        }
        Ok(())
    }

    /// At least one SMS provider must be configured, or sends fail at
    /// the router with no fallback — surfaced here as a startup error
    /// rather than discovered on the first OTP send.
    fn validate_provider_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.sms.sms_to.is_none() && config.sms.twilio.is_none() {
            return Err(ConfigValidationError::ProviderValidationFailed {
                message: "at least one SMS provider (sms_to or twilio) must be configured".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SmsProvidersConfig, SmsToConfig};
    use secrecy::Secret;

    fn valid_test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.shopify.multipass_secret = Secret::new("a-very-long-and-secure-secret".to_string());
        config.sms = SmsProvidersConfig {
            sms_to: Some(SmsToConfig {
                api_key: Secret::new("key".to_string()),
                sender_id: "SENDER".to_string(),
            }),
            twilio: None,
        };
        config
    }

    #[test]
    fn accepts_a_complete_config() {
        assert!(ConfigValidator::validate_config(&valid_test_config()).is_ok());
    }

    #[test]
    fn rejects_short_multipass_secret() {
        let mut config = valid_test_config();
        config.shopify.multipass_secret = Secret::new("short".to_string());
        let result = ConfigValidator::validate_config(&config);
        match result {
            Err(ConfigValidationError::SecurityValidationFailed { message }) => {
                assert!(message.contains("multipass secret"));
            }
            other => panic!("expected SecurityValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn rejects_config_with_no_sms_provider() {
        let mut config = valid_test_config();
        config.sms = SmsProvidersConfig::default();
        let result = ConfigValidator::validate_config(&config);
        assert!(matches!(result, Err(ConfigValidationError::ProviderValidationFailed { .. })));
    }

    #[test]
    fn rejects_invalid_port() {
        let mut config = valid_test_config();
        config.server.port = 0;
        assert!(matches!(
            ConfigValidator::validate_config(&config),
            Err(ConfigValidationError::ValidationFailed(_))
        ));
    }
}
