//! Authentication orchestration (§4.7/C7) — phone, email, and OAuth
//! flows, gating OTPEngine/SMSRouter (via JobQueue)/SettingsProvider/
//! RateLimiter and minting credentials on success via SSOTokenMinter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use otp_crypto::PasswordHasher;
use otp_store::KeyedStore;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::directory_client::{Customer, DirectoryClient, NewCustomer};
use crate::oauth::{OAuthAdapter, OAuthError, OAuthProviderKind};

use super::otp_engine::{OtpEngine, Purpose, VerifyOutcome};
use super::settings::SettingsProvider;
use super::sms_queue::{JobQueue, SmsJob};
use super::sso_minter::{CustomerIdentity, SsoMintRequest, SsoTokenMinter};

const SEND_ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);
const SEND_BLOCK_DURATION: Duration = Duration::from_secs(10 * 60);
const SESSION_SNAPSHOT_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-identity SMS send admission, sourced from `OTP_*`/`SMS_*` env
/// vars (`otp_config::OtpConfig::sms_resend_cooldown_seconds`/
/// `sms_max_send_attempts`) rather than hardcoded, so an operator can
/// tune resend behavior without a rebuild.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub resend_cooldown: Duration,
    pub max_send_attempts: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { resend_cooldown: Duration::from_secs(30), max_send_attempts: 3 }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication method is disabled")]
    MethodDisabled,
    #[error("identity is blocked")]
    Blocked,
    #[error("cooldown active, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },
    #[error("send rate exceeded, retry in {retry_after_secs}s")]
    SendRateExceeded { retry_after_secs: u64 },
    #[error("invalid credentials")]
    BadCredentials,
    #[error("provider error")]
    ProviderError(String),
    #[error("directory error")]
    DirectoryError(String),
    #[error("failed to mint credential")]
    MintError(String),
}

#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    pub success: bool,
    pub sso_url: Option<String>,
    pub customer_ref: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SendCodeOutcome {
    pub success: bool,
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub checkout_url: Option<String>,
    pub timestamp_ms: i64,
    pub cart_token: Option<String>,
}

fn phone_regex() -> Regex {
    Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid E.164 pattern")
}

fn email_regex() -> Regex {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern")
}

/// Minimum password strength enforced when the email flow lazily
/// creates an account (§4.7 "memory-hard KDF... cost factor
/// equivalent to bcrypt cost ≥ 12"). An existing account's stored
/// hash is never re-checked against this rule — only the
/// create-on-absence branch calls it.
fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.len() < 12 {
        return Err("password must be at least 12 characters".to_string());
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if !(has_upper && has_lower && has_digit && has_special) {
        return Err("password must mix upper, lower, digit, and special characters".to_string());
    }
    Ok(())
}

fn six_digit_regex() -> Regex {
    Regex::new(r"^\d{6}$").expect("valid six-digit pattern")
}

pub struct AuthOrchestrator {
    store: Arc<dyn KeyedStore>,
    otp: Arc<OtpEngine>,
    queue: Arc<JobQueue>,
    directory: Arc<dyn DirectoryClient>,
    minter: Arc<SsoTokenMinter>,
    settings: Arc<SettingsProvider>,
    password_hasher: PasswordHasher,
    oauth_adapters: HashMap<OAuthProviderKind, Arc<dyn OAuthAdapter>>,
    config: OrchestratorConfig,
}

impl AuthOrchestrator {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        otp: Arc<OtpEngine>,
        queue: Arc<JobQueue>,
        directory: Arc<dyn DirectoryClient>,
        minter: Arc<SsoTokenMinter>,
        settings: Arc<SettingsProvider>,
        oauth_adapters: HashMap<OAuthProviderKind, Arc<dyn OAuthAdapter>>,
    ) -> Self {
        Self::with_config(store, otp, queue, directory, minter, settings, oauth_adapters, OrchestratorConfig::default())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        store: Arc<dyn KeyedStore>,
        otp: Arc<OtpEngine>,
        queue: Arc<JobQueue>,
        directory: Arc<dyn DirectoryClient>,
        minter: Arc<SsoTokenMinter>,
        settings: Arc<SettingsProvider>,
        oauth_adapters: HashMap<OAuthProviderKind, Arc<dyn OAuthAdapter>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { store, otp, queue, directory, minter, settings, password_hasher: PasswordHasher::new(), oauth_adapters, config }
    }

    async fn ensure_method_enabled(&self, enabled: impl Fn(&super::settings::EnabledMethods) -> bool) -> Result<(), OrchestratorError> {
        let settings = self.settings.get().await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?;
        if enabled(&settings.enabled_methods) {
            Ok(())
        } else {
            Err(OrchestratorError::MethodDisabled)
        }
    }

    // ---- Phone flow ----------------------------------------------------

    pub async fn request_phone_code(&self, phone: &str) -> Result<SendCodeOutcome, OrchestratorError> {
        self.ensure_method_enabled(|m| m.sms).await?;

        if !phone_regex().is_match(phone) {
            return Err(OrchestratorError::InvalidInput("phone must be E.164".to_string()));
        }

        let cooldown_key = format!("sms:cooldown:{phone}");
        if let Ok(Some(ttl)) = self.store.pttl(&cooldown_key).await {
            return Err(OrchestratorError::CooldownActive { retry_after_secs: ttl.as_secs().max(1) });
        }

        let block_key = format!("sms:block:{phone}");
        if self.store.exists(&block_key).await.unwrap_or(false) {
            let retry_after = self.store.pttl(&block_key).await.ok().flatten().map(|t| t.as_secs()).unwrap_or(SEND_BLOCK_DURATION.as_secs());
            return Err(OrchestratorError::SendRateExceeded { retry_after_secs: retry_after.max(1) });
        }

        let attempts_key = format!("sms:attempts:{phone}");
        let attempts = self.store.incr(&attempts_key).await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?;
        if attempts == 1 {
            let _ = self.store.expire(&attempts_key, SEND_ATTEMPT_WINDOW).await;
        }
        if attempts > self.config.max_send_attempts {
            let _ = self.store.set_raw_if_absent(&block_key, "1".to_string(), SEND_BLOCK_DURATION).await;
            return Err(OrchestratorError::SendRateExceeded { retry_after_secs: SEND_BLOCK_DURATION.as_secs() });
        }

        let code = self.otp.issue(Purpose::Login, phone).await.map_err(|e| match e {
            super::otp_engine::OtpError::Blocked => OrchestratorError::Blocked,
            other => OrchestratorError::DirectoryError(other.to_string()),
        })?;

        let _ = self.store.set_raw(&cooldown_key, "1".to_string(), self.config.resend_cooldown).await;

        self.queue
            .push(SmsJob {
                identity: phone.to_string(),
                to: phone.to_string(),
                message: format!("Your verification code is: {code}. Valid for 5 minutes."),
                delivery_callback_url: None,
                attempt: 0,
            })
            .await;

        Ok(SendCodeOutcome { success: true, cooldown_seconds: Some(self.config.resend_cooldown.as_secs()) })
    }

    pub async fn verify_phone_code(&self, phone: &str, candidate: &str, return_to: Option<String>) -> Result<AuthOutcome, OrchestratorError> {
        self.ensure_method_enabled(|m| m.sms).await?;

        if !six_digit_regex().is_match(candidate) {
            return Err(OrchestratorError::InvalidInput("code must be six digits".to_string()));
        }

        let outcome = self.otp.verify(Purpose::Login, phone, candidate).await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?;
        match outcome {
            VerifyOutcome::Blocked => return Err(OrchestratorError::Blocked),
            VerifyOutcome::Expired | VerifyOutcome::Mismatch => return Err(OrchestratorError::BadCredentials),
            VerifyOutcome::Ok => {}
        }

        let customer = match self.directory.find_by_phone(phone).await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))? {
            Some(customer) => customer,
            None => self
                .directory
                .create(NewCustomer { email: format!("{phone}@phone.local"), phone: Some(phone.to_string()), tag: "sms-auth".to_string(), ..Default::default() })
                .await
                .map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?,
        };

        let mut metadata = HashMap::new();
        metadata.insert("auth_method".to_string(), "sms".to_string());
        metadata.insert("phone_verified".to_string(), "true".to_string());
        metadata.insert("last_login".to_string(), Utc::now().to_rfc3339());
        if let Err(e) = self.directory.update_metadata(&customer.id, metadata).await {
            warn!(error = %e, customer_id = %customer.id, "failed to update customer metadata after sms auth");
        }

        self.mint(&customer, return_to, None).map(|sso_url| AuthOutcome { success: true, sso_url: Some(sso_url), customer_ref: Some(customer.id) })
    }

    // ---- Email flow ------------------------------------------------------

    /// §4.7 email flow: a lookup miss lazily registers the account
    /// with this password (generalizing the teacher's
    /// `LazyRegistrationService`, which creates an identity record on
    /// first successful auth rather than requiring an up-front signup
    /// step); a lookup hit verifies the supplied password against the
    /// stored hash in constant time. Either branch mints the same way.
    pub async fn email_login(&self, email: &str, password: &str, return_to: Option<String>) -> Result<AuthOutcome, OrchestratorError> {
        self.ensure_method_enabled(|m| m.email).await?;

        if !email_regex().is_match(email) {
            return Err(OrchestratorError::InvalidInput("email is malformed".to_string()));
        }

        let customer = match self.directory.find_by_email(email).await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))? {
            Some(customer) => {
                let hash = customer.metadata.get("password_hash").cloned().ok_or(OrchestratorError::BadCredentials)?;
                let verified = self.password_hasher.verify_password(password, &hash).unwrap_or(false);
                if !verified {
                    // §7: the caller MUST NOT learn whether the email
                    // exists from this branch vs. a wrong password on
                    // an existing account — both surface BadCredentials.
                    return Err(OrchestratorError::BadCredentials);
                }
                customer
            }
            None => {
                validate_password_strength(password).map_err(OrchestratorError::InvalidInput)?;
                let hash = self.password_hasher.hash_password(password).map_err(|e| OrchestratorError::MintError(e.to_string()))?;
                self.directory
                    .create(NewCustomer { email: email.to_string(), tag: "email-auth".to_string(), password_hash: Some(hash), ..Default::default() })
                    .await
                    .map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?
            }
        };

        self.mint(&customer, return_to, None).map(|sso_url| AuthOutcome { success: true, sso_url: Some(sso_url), customer_ref: Some(customer.id) })
    }

    // ---- OAuth flow --------------------------------------------------

    pub fn oauth_authorization_url(&self, provider: OAuthProviderKind, state: &str, redirect_uri: &str) -> Result<String, OrchestratorError> {
        let adapter = self.oauth_adapters.get(&provider).ok_or_else(|| OrchestratorError::ProviderError("provider not configured".to_string()))?;
        Ok(adapter.authorization_url(state, redirect_uri))
    }

    pub async fn oauth_callback(&self, provider: OAuthProviderKind, code: &str, redirect_uri: &str, return_to: Option<String>) -> Result<AuthOutcome, OrchestratorError> {
        self.ensure_method_enabled(|m| m.google).await?;

        let adapter = self.oauth_adapters.get(&provider).ok_or_else(|| OrchestratorError::ProviderError("provider not configured".to_string()))?;
        let profile = adapter.exchange_and_fetch_profile(code, redirect_uri).await.map_err(|e| match e {
            OAuthError::Provider(detail) | OAuthError::TokenExchange(detail) | OAuthError::ProfileFetch(detail) => OrchestratorError::ProviderError(detail),
        })?;

        let customer = match self.directory.find_by_email(&profile.email).await.map_err(|e| OrchestratorError::DirectoryError(e.to_string()))? {
            Some(customer) => customer,
            None => self
                .directory
                .create(NewCustomer {
                    email: profile.email.clone(),
                    phone: profile.phone.clone(),
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    tag: format!("{}-auth", provider.tag().trim_end_matches("-auth")),
                    ..Default::default()
                })
                .await
                .map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?,
        };

        self.mint(&customer, return_to, None).map(|sso_url| AuthOutcome { success: true, sso_url: Some(sso_url), customer_ref: Some(customer.id) })
    }

    // ---- Session restore -------------------------------------------------

    /// Re-mints an SSO URL for an already-identified customer,
    /// echoing the client-supplied `snapshot` back into the new
    /// token's `return_to`/`cart` fields without persisting it
    /// anywhere (§3: SessionSnapshot is "neither stored nor trusted
    /// beyond echo").
    pub async fn restore_session(&self, customer_ref: &str, snapshot: SessionSnapshot) -> Result<AuthOutcome, OrchestratorError> {
        let age_ms = Utc::now().timestamp_millis() - snapshot.timestamp_ms;
        if age_ms < 0 || age_ms as u64 > SESSION_SNAPSHOT_TTL.as_millis() as u64 {
            return Err(OrchestratorError::InvalidInput("session snapshot has expired".to_string()));
        }

        let customer = self.directory_customer_by_id(customer_ref).await?;
        self.mint(&customer, snapshot.checkout_url, snapshot.cart_token)
            .map(|sso_url| AuthOutcome { success: true, sso_url: Some(sso_url), customer_ref: Some(customer.id) })
    }

    async fn directory_customer_by_id(&self, customer_ref: &str) -> Result<Customer, OrchestratorError> {
        self.directory
            .find_by_id(customer_ref)
            .await
            .map_err(|e| OrchestratorError::DirectoryError(e.to_string()))?
            .ok_or_else(|| OrchestratorError::DirectoryError("customer not found".to_string()))
    }

    fn mint(&self, customer: &Customer, return_to: Option<String>, cart_token: Option<String>) -> Result<String, OrchestratorError> {
        self.minter
            .mint(&SsoMintRequest { customer: CustomerIdentity::from(customer), return_to, cart_token })
            .map_err(|e| OrchestratorError::MintError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_client::InMemoryDirectoryClient;
    use crate::services::otp_engine::OtpEngineConfig;
    use otp_store::InMemoryStore;

    fn orchestrator() -> AuthOrchestrator {
        let store: Arc<dyn KeyedStore> = Arc::new(InMemoryStore::new());
        let otp = Arc::new(OtpEngine::new(store.clone(), OtpEngineConfig::default()));
        let queue = JobQueue::new(store.clone());
        let directory: Arc<dyn DirectoryClient> = Arc::new(InMemoryDirectoryClient::new());
        let minter = Arc::new(SsoTokenMinter::new("shop.example.com", "super-secret-value"));
        let settings = Arc::new(SettingsProvider::new(store.clone()));
        AuthOrchestrator::new(store, otp, queue, directory, minter, settings, HashMap::new())
    }

    #[tokio::test]
    async fn phone_flow_verifies_issued_code_and_creates_customer() {
        let orchestrator = orchestrator();
        let phone = "+15551234567";

        let code = orchestrator.otp.issue(Purpose::Login, phone).await.unwrap();
        let verified = orchestrator.verify_phone_code(phone, &code, Some("https://shop.example.com/cart".to_string())).await.unwrap();

        assert!(verified.success);
        assert!(verified.customer_ref.is_some());
        let found = orchestrator.directory.find_by_phone(phone).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn phone_flow_rejects_wrong_code() {
        let orchestrator = orchestrator();
        let phone = "+15559998888";
        orchestrator.otp.issue(Purpose::Login, phone).await.unwrap();
        let result = orchestrator.verify_phone_code(phone, "000000", None).await;
        assert!(matches!(result, Err(OrchestratorError::BadCredentials)));
    }

    #[tokio::test]
    async fn second_send_within_cooldown_is_rejected() {
        let orchestrator = orchestrator();
        let phone = "+15557654321";
        orchestrator.request_phone_code(phone).await.unwrap();
        let second = orchestrator.request_phone_code(phone).await;
        assert!(matches!(second, Err(OrchestratorError::CooldownActive { .. })));
    }

    #[tokio::test]
    async fn email_login_lazily_creates_account_on_first_attempt() {
        let orchestrator = orchestrator();
        let outcome = orchestrator.email_login("new@example.com", "Str0ng!Passw0rd", None).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.sso_url.unwrap().contains("/account/login/multipass/"));
    }

    #[tokio::test]
    async fn email_login_rejects_weak_password_on_first_attempt() {
        let orchestrator = orchestrator();
        let outcome = orchestrator.email_login("new@example.com", "short", None).await;
        assert!(matches!(outcome, Err(OrchestratorError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn email_login_verifies_existing_account_and_rejects_wrong_password() {
        let orchestrator = orchestrator();
        orchestrator.email_login("existing@example.com", "Str0ng!Passw0rd", None).await.unwrap();

        let wrong = orchestrator.email_login("existing@example.com", "Totally!Wr0ngPass", None).await;
        assert!(matches!(wrong, Err(OrchestratorError::BadCredentials)));

        let right = orchestrator.email_login("existing@example.com", "Str0ng!Passw0rd", None).await.unwrap();
        assert!(right.success);
    }

    #[tokio::test]
    async fn malformed_email_is_rejected_before_any_directory_lookup() {
        let orchestrator = orchestrator();
        let outcome = orchestrator.email_login("not-an-email", "Str0ng!Passw0rd", None).await;
        assert!(matches!(outcome, Err(OrchestratorError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn session_restore_rejects_stale_snapshot() {
        let orchestrator = orchestrator();
        let created = orchestrator.email_login("restore@example.com", "Str0ng!Passw0rd", None).await.unwrap();
        let snapshot = SessionSnapshot { checkout_url: None, timestamp_ms: Utc::now().timestamp_millis() - 10 * 60 * 1000, cart_token: None };
        let result = orchestrator.restore_session(&created.customer_ref.unwrap(), snapshot).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
    }
}
