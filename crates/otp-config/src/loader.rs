//! Configuration loading from layered file sources plus the fixed
//! environment-variable surface ops tooling expects (§6 env vars).

use crate::config::{
    AppConfig, GoogleOAuthConfig, OAuthConfig, OtpConfig, RateLimitConfig, ShopifyConfig,
    SmsProvidersConfig, SmsToConfig, StoreConfig, TwilioConfig,
};
use config::{Config, ConfigError, File};
use secrecy::Secret;
use std::env;
use std::path::Path;

pub struct ConfigLoader {
    config_dir: String,
    environment: String,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            environment: environment.into(),
        }
    }

    /// Layers `{config_dir}/default`, `{config_dir}/{environment}`, and
    /// `{config_dir}/local` (each optional), then applies the named
    /// environment variables from §6 on top.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let base = Config::builder()
            .add_source(File::with_name(&format!("{}/default", self.config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", self.config_dir, self.environment)).required(false))
            .add_source(File::with_name(&format!("{}/local", self.config_dir)).required(false))
            .build()?;

        let mut app_config: AppConfig = base.try_deserialize().unwrap_or_default();
        apply_env_overrides(&mut app_config);
        Ok(app_config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
        let config = Config::builder().add_source(File::from(path.as_ref())).build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;
        apply_env_overrides(&mut app_config);
        Ok(app_config)
    }

    pub fn load_from_env() -> Result<AppConfig, ConfigError> {
        let mut app_config = AppConfig::default();
        apply_env_overrides(&mut app_config);
        Ok(app_config)
    }
}

/// Overlays the literal env var names from §6 onto `config`, preserved
/// for ops compatibility rather than mapped through a common prefix.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(port) = env_parsed("PORT") {
        config.server.port = port;
    }
    if let Some(level) = env::var("LOG_LEVEL").ok() {
        config.logging.level = level;
    }
    if let Some(redis_url) = env::var("REDIS_URL").ok() {
        config.store.redis_url = Some(redis_url);
    }
    if let Some(tls) = env_bool("REDIS_TLS") {
        config.store.redis_tls = tls;
    }
    if let Some(reject) = env_bool("REDIS_TLS_REJECT_UNAUTHORIZED") {
        config.store.redis_tls_reject_unauthorized = reject;
    }

    if let Ok(shop_domain) = env::var("SHOPIFY_SHOP_DOMAIN") {
        config.shopify.shop_domain = shop_domain;
    }
    if let Ok(api_key) = env::var("SHOPIFY_API_KEY") {
        config.shopify.api_key = Some(api_key);
    }
    if let Ok(api_secret) = env::var("SHOPIFY_API_SECRET") {
        config.shopify.api_secret = Some(Secret::new(api_secret));
    }
    if let Ok(multipass_secret) = env::var("SHOPIFY_MULTIPASS_SECRET") {
        config.shopify.multipass_secret = Secret::new(multipass_secret);
    }

    let sms_to = match (env::var("SMS_TO_API_KEY").ok(), env::var("SMS_TO_SENDER_ID").ok()) {
        (Some(api_key), Some(sender_id)) => Some(SmsToConfig {
            api_key: Secret::new(api_key),
            sender_id,
        }),
        _ => config.sms.sms_to.take(),
    };
    let twilio = match (
        env::var("TWILIO_ACCOUNT_SID").ok(),
        env::var("TWILIO_AUTH_TOKEN").ok(),
        env::var("TWILIO_FROM_NUMBER").ok(),
    ) {
        (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
            account_sid,
            auth_token: Secret::new(auth_token),
            from_number,
        }),
        _ => config.sms.twilio.take(),
    };
    config.sms = SmsProvidersConfig { sms_to, twilio };

    let google = match (
        env::var("GOOGLE_CLIENT_ID").ok(),
        env::var("GOOGLE_CLIENT_SECRET").ok(),
        env::var("GOOGLE_REDIRECT_URI").ok(),
    ) {
        (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(GoogleOAuthConfig {
            client_id,
            client_secret: Secret::new(client_secret),
            redirect_uri,
        }),
        _ => config.oauth.google.take(),
    };
    config.oauth = OAuthConfig { google };

    let otp = &mut config.otp;
    if let Some(v) = env_parsed("OTP_LENGTH") {
        otp.length = v;
    }
    if let Some(v) = env_parsed("OTP_TTL_SECONDS") {
        otp.ttl_seconds = v;
    }
    if let Some(v) = env_parsed("OTP_MAX_ATTEMPTS") {
        otp.max_attempts = v;
    }
    if let Some(v) = env_parsed("OTP_BLOCK_DURATION_SECONDS") {
        otp.block_duration_seconds = v;
    }
    if let Some(v) = env_parsed("SMS_RESEND_COOLDOWN_SECONDS") {
        otp.sms_resend_cooldown_seconds = v;
    }
    if let Some(v) = env_parsed("SMS_MAX_SEND_ATTEMPTS") {
        otp.sms_max_send_attempts = v;
    }

    config.rate_limit = RateLimitConfig {
        window_ms: env_parsed("RATE_LIMIT_WINDOW_MS").unwrap_or(config.rate_limit.window_ms),
        max_requests: env_parsed("RATE_LIMIT_MAX_REQUESTS").unwrap_or(config.rate_limit.max_requests),
    };

    if let Ok(base_url) = env::var("DIRECTORY_BASE_URL") {
        config.directory.base_url = Some(base_url);
    }
    if let Ok(api_key) = env::var("DIRECTORY_API_KEY") {
        config.directory.api_key = Some(Secret::new(api_key));
    }

    let _: &StoreConfig = &config.store;
    let _: &ShopifyConfig = &config.shopify;
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}
