//! Core configuration structures for the OTP/SSO gateway.

use secrecy::Secret;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub shopify: ShopifyConfig,
    #[validate]
    pub sms: SmsProvidersConfig,
    pub oauth: OAuthConfig,
    pub otp: OtpConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

/// Backing state store. `redis_url` absent means the gateway runs
/// against the in-memory `KeyedStore` (single instance only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub redis_url: Option<String>,
    pub redis_tls: bool,
    pub redis_tls_reject_unauthorized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShopifyConfig {
    #[validate(length(min = 1))]
    pub shop_domain: String,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<Secret<String>>,
    #[serde(skip_serializing)]
    pub multipass_secret: Secret<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct SmsProvidersConfig {
    pub sms_to: Option<SmsToConfig>,
    pub twilio: Option<TwilioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsToConfig {
    #[serde(skip_serializing)]
    pub api_key: Secret<String>,
    pub sender_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    #[serde(skip_serializing)]
    pub auth_token: Secret<String>,
    pub from_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OAuthConfig {
    pub google: Option<GoogleOAuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OtpConfig {
    #[validate(range(min = 4, max = 10))]
    pub length: u8,
    pub ttl_seconds: u64,
    pub max_attempts: u32,
    pub block_duration_seconds: u64,
    pub sms_resend_cooldown_seconds: u64,
    pub sms_max_send_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    #[validate(range(min = 1))]
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Customer-directory endpoint. Absent means the gateway runs against
/// [`otp_core::directory_client::InMemoryDirectoryClient`] instead of a
/// real merchant-platform customer API, the same optional-with-fallback
/// shape as [`StoreConfig::redis_url`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectoryConfig {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<Secret<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 8080 },
            store: StoreConfig {
                redis_url: None,
                redis_tls: false,
                redis_tls_reject_unauthorized: true,
            },
            shopify: ShopifyConfig {
                shop_domain: "shop.example.com".to_string(),
                api_key: None,
                api_secret: None,
                multipass_secret: Secret::new("change-me-in-production".to_string()),
            },
            sms: SmsProvidersConfig::default(),
            oauth: OAuthConfig::default(),
            otp: OtpConfig {
                length: 6,
                ttl_seconds: 300,
                max_attempts: 5,
                block_duration_seconds: 900,
                sms_resend_cooldown_seconds: 30,
                sms_max_send_attempts: 3,
            },
            rate_limit: RateLimitConfig {
                window_ms: 60_000,
                max_requests: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            directory: DirectoryConfig::default(),
        }
    }
}
