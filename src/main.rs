//! Composition root for the multi-channel customer authentication and
//! SSO token gateway (§0, §6).
//!
//! Wires the injectable pieces — store, SMS providers, directory
//! client, OAuth adapters, the background delivery worker — from
//! `AppConfig`, then hands the assembled `otp_api::AppState` to the
//! HTTP layer. Nothing below the composition root depends on how any
//! of this was built; every dependency is expressed as a trait object.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use otp_config::{ConfigLoader, ConfigManager};
use otp_core::directory_client::{DirectoryClient, HttpDirectoryClient, InMemoryDirectoryClient};
use otp_core::oauth::{GoogleOAuthAdapter, GoogleOAuthConfig, OAuthAdapter, OAuthProviderKind};
use otp_core::services::orchestrator::{AuthOrchestrator, OrchestratorConfig};
use otp_core::services::otp_engine::{OtpEngine, OtpEngineConfig};
use otp_core::services::rate_limiter::{RateLimiter, RateLimiterConfig};
use otp_core::services::settings::SettingsProvider;
use otp_core::services::sms_provider::{SmsProvider, SmsToProvider, TwilioProvider};
use otp_core::services::sms_queue::{JobQueue, SmsWorker};
use otp_core::services::sms_router::SmsRouter;
use otp_core::services::sso_minter::SsoTokenMinter;
use otp_store::{InMemoryStore, KeyedStore, RedisStore};
use otp_telemetry::{shutdown_signal, Clock, SystemClock};
use secrecy::ExposeSecret;
use tracing::info;

use otp_api::AppState;

/// How many `SmsWorker`s drain the shared `JobQueue`. Workers only
/// contend over the queue's internal channel, so a small fixed pool is
/// enough to keep retries and rotations moving without per-deployment
/// tuning.
const SMS_WORKER_POOL_SIZE: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
    let config_manager = ConfigManager::new(ConfigLoader::new(config_dir, environment))
        .context("failed to load configuration")?;
    let config = config_manager.get_config();

    otp_telemetry::init_telemetry(&format!(
        "{},otp_core=debug,otp_api=debug,tower_http=debug",
        config.logging.level
    ))?;

    info!(port = config.server.port, "starting otp-sso-gateway");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn KeyedStore> = match &config.store.redis_url {
        Some(url) => {
            info!("using redis-backed store");
            Arc::new(RedisStore::new(url).context("failed to connect to redis")?)
        }
        None => {
            info!("using in-memory store (single instance only)");
            Arc::new(InMemoryStore::new())
        }
    };

    // SMS providers, ordered by priority: sms.to first when configured,
    // Twilio as the secondary/fallback channel (§4.3/§4.4).
    let mut sms_providers: Vec<Arc<dyn SmsProvider>> = Vec::new();
    let mut webhook_secrets: HashMap<String, String> = HashMap::new();
    if let Some(sms_to) = &config.sms.sms_to {
        let provider = SmsToProvider::new(sms_to.api_key.expose_secret().clone(), sms_to.sender_id.clone(), 1);
        webhook_secrets.insert(provider.name().to_string(), sms_to.api_key.expose_secret().clone());
        sms_providers.push(Arc::new(provider));
    }
    if let Some(twilio) = &config.sms.twilio {
        let provider = TwilioProvider::new(twilio.account_sid.clone(), twilio.auth_token.expose_secret().clone(), twilio.from_number.clone(), 2);
        webhook_secrets.insert(provider.name().to_string(), twilio.auth_token.expose_secret().clone());
        sms_providers.push(Arc::new(provider));
    }
    if sms_providers.is_empty() {
        anyhow::bail!("no sms provider configured: set SMS_TO_* or TWILIO_* env vars");
    }

    let directory: Arc<dyn DirectoryClient> = match &config.directory.base_url {
        Some(base_url) => {
            let api_key = config.directory.api_key.as_ref().map(|s| s.expose_secret().clone()).unwrap_or_default();
            Arc::new(HttpDirectoryClient::new(base_url.clone(), api_key))
        }
        None => {
            info!("no directory base url configured, using in-memory directory client");
            Arc::new(InMemoryDirectoryClient::new())
        }
    };

    let mut oauth_adapters: HashMap<OAuthProviderKind, Arc<dyn OAuthAdapter>> = HashMap::new();
    let mut oauth_redirect_uris: HashMap<OAuthProviderKind, String> = HashMap::new();
    if let Some(google) = &config.oauth.google {
        oauth_redirect_uris.insert(OAuthProviderKind::Google, google.redirect_uri.clone());
        oauth_adapters.insert(
            OAuthProviderKind::Google,
            Arc::new(GoogleOAuthAdapter::new(GoogleOAuthConfig {
                client_id: google.client_id.clone(),
                client_secret: google.client_secret.expose_secret().clone(),
            })),
        );
    }

    let minter = Arc::new(SsoTokenMinter::new(config.shopify.shop_domain.clone(), config.shopify.multipass_secret.expose_secret()));
    let settings = Arc::new(SettingsProvider::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        store.clone(),
        RateLimiterConfig { window: Duration::from_millis(config.rate_limit.window_ms), max_requests: config.rate_limit.max_requests as i64 },
    ));

    let otp_engine = Arc::new(OtpEngine::new(
        store.clone(),
        OtpEngineConfig {
            code_length: config.otp.length,
            ttl: Duration::from_secs(config.otp.ttl_seconds),
            max_attempts_per_record: 3,
            max_cumulative_failures: config.otp.max_attempts,
            block_duration: Duration::from_secs(config.otp.block_duration_seconds),
            ..OtpEngineConfig::default()
        },
    ));

    let sms_router = Arc::new(SmsRouter::new(sms_providers, store.clone(), clock.clone()));
    let queue = JobQueue::new(store.clone());
    queue.rehydrate().await;

    let mut worker_handles = Vec::with_capacity(SMS_WORKER_POOL_SIZE);
    for _ in 0..SMS_WORKER_POOL_SIZE {
        let worker = SmsWorker::new(queue.clone(), sms_router.clone());
        worker_handles.push(tokio::spawn(async move { worker.run().await }));
    }

    let orchestrator = Arc::new(AuthOrchestrator::with_config(
        store.clone(),
        otp_engine,
        queue.clone(),
        directory,
        minter,
        settings.clone(),
        oauth_adapters,
        OrchestratorConfig {
            resend_cooldown: Duration::from_secs(config.otp.sms_resend_cooldown_seconds),
            max_send_attempts: config.otp.sms_max_send_attempts as i64,
        },
    ));

    let state = AppState {
        orchestrator,
        settings,
        rate_limiter,
        sms_router,
        store,
        webhook_secrets,
        oauth_redirect_uris,
    };

    let app = otp_api::app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind tcp listener")?;
    info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    queue.request_shutdown();
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}
