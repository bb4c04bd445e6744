//! SSO token minting compatible with the Shopify Multipass wire format.
//!
//! `keyMaterial = SHA-256(secret)`; the first 16 bytes become the AES
//! key, the next 16 the HMAC key. The payload is AES-128-CBC encrypted
//! then HMAC-SHA256 signed over `IV || ciphertext`; the wire token is
//! `base64url(IV || CT || sig)`, unpadded.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

#[derive(Debug, Error)]
pub enum MultipassError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("created_at is not a valid ISO-8601 UTC timestamp")]
    InvalidTimestamp,
    #[error("created_at is outside the acceptable freshness window")]
    StaleTimestamp,
    #[error("return_to is not a well-formed absolute URL")]
    InvalidReturnTo,
}

/// Input record for minting an SSO token. `created_at` defaults to now
/// when `None`; callers that need deterministic tests may supply it.
#[derive(Debug, Clone, Default)]
pub struct MintInput {
    pub email: String,
    pub created_at: Option<DateTime<Utc>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub identifier: Option<String>,
    pub return_to: Option<String>,
    pub cart_token: Option<String>,
}

impl MintInput {
    /// Validates the record the way §4.6 ValidateInput requires,
    /// without performing any encryption.
    pub fn validate(&self) -> Result<(), MultipassError> {
        if self.email.trim().is_empty() {
            return Err(MultipassError::MissingField("email"));
        }
        if let Some(created_at) = self.created_at {
            let skew = (Utc::now() - created_at).num_seconds().abs();
            if skew > ChronoDuration::minutes(5).num_seconds() {
                return Err(MultipassError::StaleTimestamp);
            }
        }
        if let Some(return_to) = &self.return_to {
            let url = Url::parse(return_to).map_err(|_| MultipassError::InvalidReturnTo)?;
            if url.cannot_be_a_base() {
                return Err(MultipassError::InvalidReturnTo);
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CanonicalPayload(BTreeMap<&'static str, serde_json::Value>);

/// Mints Multipass SSO URLs for a single shop, holding the derived
/// AES/HMAC keys so they are computed from the secret exactly once.
#[derive(Clone)]
pub struct MultipassMinter {
    shop_domain: String,
    enc_key: [u8; 16],
    mac_key: [u8; 16],
}

impl MultipassMinter {
    pub fn new(shop_domain: impl Into<String>, secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut enc_key = [0u8; 16];
        let mut mac_key = [0u8; 16];
        enc_key.copy_from_slice(&digest[0..16]);
        mac_key.copy_from_slice(&digest[16..32]);
        Self {
            shop_domain: shop_domain.into(),
            enc_key,
            mac_key,
        }
    }

    /// Mints the SSO URL for `input`, optionally appending `return_to`
    /// and/or `cart` query parameters. `input.return_to` (if present)
    /// is carried inside the encrypted payload per §4.6 step 2; it is
    /// not itself the query parameter (the caller decides both
    /// independently).
    pub fn mint(&self, input: &MintInput) -> Result<String, MultipassError> {
        input.validate()?;

        let created_at = input.created_at.unwrap_or_else(Utc::now);
        let mut fields: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
        fields.insert("email", serde_json::Value::String(input.email.clone()));
        fields.insert(
            "created_at",
            serde_json::Value::String(created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        if let Some(v) = &input.first_name {
            fields.insert("first_name", serde_json::Value::String(v.clone()));
        }
        if let Some(v) = &input.last_name {
            fields.insert("last_name", serde_json::Value::String(v.clone()));
        }
        if let Some(v) = &input.identifier {
            fields.insert("identifier", serde_json::Value::String(v.clone()));
        }
        if let Some(v) = &input.return_to {
            fields.insert("return_to", serde_json::Value::String(v.clone()));
        }

        let payload = serde_json::to_vec(&CanonicalPayload(fields)).expect("canonical payload always serializes");

        let mut iv = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new(&self.enc_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(&payload);

        let mut iv_ct = Vec::with_capacity(16 + ciphertext.len());
        iv_ct.extend_from_slice(&iv);
        iv_ct.extend_from_slice(&ciphertext);

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(&iv_ct);
        let sig = mac.finalize().into_bytes();

        let mut wire = iv_ct;
        wire.extend_from_slice(&sig);
        let token = URL_SAFE_NO_PAD.encode(wire);

        let mut url = format!("https://{}/account/login/multipass/{}", self.shop_domain, token);
        let mut query_parts = Vec::new();
        if let Some(return_to) = &input.return_to {
            query_parts.push(format!("return_to={}", urlencoding::encode(return_to)));
        }
        if let Some(cart_token) = &input.cart_token {
            query_parts.push(format!("cart={}", urlencoding::encode(cart_token)));
        }
        if !query_parts.is_empty() {
            url.push('?');
            url.push_str(&query_parts.join("&"));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_url_with_expected_prefix() {
        let minter = MultipassMinter::new("shop.example.com", "super-secret");
        let input = MintInput {
            email: "customer@example.com".to_string(),
            created_at: Some(Utc::now()),
            identifier: Some("C1".to_string()),
            return_to: Some("https://shop.example.com/cart".to_string()),
            ..Default::default()
        };
        let url = minter.mint(&input).unwrap();
        assert!(url.starts_with("https://shop.example.com/account/login/multipass/"));
        assert!(url.contains("return_to="));
    }

    #[test]
    fn rejects_missing_email() {
        let minter = MultipassMinter::new("shop.example.com", "super-secret");
        let input = MintInput::default();
        assert!(matches!(minter.mint(&input), Err(MultipassError::MissingField("email"))));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let minter = MultipassMinter::new("shop.example.com", "super-secret");
        let input = MintInput {
            email: "customer@example.com".to_string(),
            created_at: Some(Utc::now() - ChronoDuration::minutes(10)),
            ..Default::default()
        };
        assert!(matches!(minter.mint(&input), Err(MultipassError::StaleTimestamp)));
    }

    #[test]
    fn rejects_malformed_return_to() {
        let minter = MultipassMinter::new("shop.example.com", "super-secret");
        let input = MintInput {
            email: "customer@example.com".to_string(),
            return_to: Some("not-a-url".to_string()),
            ..Default::default()
        };
        assert!(matches!(minter.mint(&input), Err(MultipassError::InvalidReturnTo)));
    }

    #[test]
    fn two_mints_for_same_input_produce_different_tokens() {
        let minter = MultipassMinter::new("shop.example.com", "super-secret");
        let input = MintInput {
            email: "customer@example.com".to_string(),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        let a = minter.mint(&input).unwrap();
        let b = minter.mint(&input).unwrap();
        assert_ne!(a, b, "random IV must vary token ciphertext between mints");
    }
}
