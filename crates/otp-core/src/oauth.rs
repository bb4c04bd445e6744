//! OAuth provider adapters (§4.7 OAuth flow).
//!
//! §9's redesign note prefers a closed enumerated set of supported
//! providers over a runtime string-keyed registry, since third-party
//! extension is not evident as a requirement in spec.md. Adding a
//! provider means adding an [`OAuthProviderKind`] variant and an
//! adapter impl, not registering a new string key at runtime.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProviderKind {
    Google,
}

impl OAuthProviderKind {
    pub fn tag(&self) -> &'static str {
        match self {
            OAuthProviderKind::Google => "google-auth",
        }
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("oauth provider error: {0}")]
    Provider(String),
    #[error("oauth token exchange failed: {0}")]
    TokenExchange(String),
    #[error("oauth profile fetch failed: {0}")]
    ProfileFetch(String),
}

/// Profile fields returned by the provider's userinfo endpoint.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email_verified: bool,
}

/// One adapter per supported provider. The orchestrator accepts a
/// `(code, provider, redirect_uri)` triple; the CSRF `state` parameter
/// is validated at the HTTP boundary, not here (§4.7).
#[async_trait]
pub trait OAuthAdapter: Send + Sync {
    fn kind(&self) -> OAuthProviderKind;

    /// Builds the authorization URL the caller redirects the browser
    /// to, embedding the caller-supplied CSRF `state`.
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchanges the authorization `code` for tokens, then fetches the
    /// user profile.
    async fn exchange_and_fetch_profile(&self, code: &str, redirect_uri: &str) -> Result<OAuthProfile, OAuthError>;
}

pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

pub struct GoogleOAuthAdapter {
    config: GoogleOAuthConfig,
    client: reqwest::Client,
}

impl GoogleOAuthAdapter {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(serde::Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    given_name: Option<String>,
    family_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[async_trait]
impl OAuthAdapter for GoogleOAuthAdapter {
    fn kind(&self) -> OAuthProviderKind {
        OAuthProviderKind::Google
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}",
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn exchange_and_fetch_profile(&self, code: &str, redirect_uri: &str) -> Result<OAuthProfile, OAuthError> {
        let token_response: TokenResponse = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        let user_info: GoogleUserInfo = self
            .client
            .get("https://openidconnect.googleapis.com/v1/userinfo")
            .bearer_auth(&token_response.access_token)
            .send()
            .await
            .map_err(|e| OAuthError::ProfileFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| OAuthError::ProfileFetch(e.to_string()))?;

        Ok(OAuthProfile {
            provider_id: user_info.sub,
            email: user_info.email,
            first_name: user_info.given_name,
            last_name: user_info.family_name,
            phone: None,
            email_verified: user_info.email_verified,
        })
    }
}

/// 32-hex-character CSRF state per §4.7.
pub fn generate_csrf_state() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_state_is_32_hex_chars() {
        let state = generate_csrf_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn authorization_url_embeds_state_and_redirect() {
        let adapter = GoogleOAuthAdapter::new(GoogleOAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
        });
        let url = adapter.authorization_url("abc123", "https://shop.example.com/callback");
        assert!(url.contains("state=abc123"));
        assert!(url.contains("client_id=client-123"));
    }
}
