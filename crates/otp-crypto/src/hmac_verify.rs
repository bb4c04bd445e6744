//! HMAC verification for webhook/query authenticity (§4.9).
//!
//! Both modes compare in constant time; a `Missing` result is
//! returned before any comparison is attempted so callers can tell
//! "no signature supplied" apart from "signature did not match".

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HmacVerifyError {
    #[error("no signature was supplied")]
    Missing,
    #[error("signature did not match")]
    Invalid,
}

/// Verifies a query-string HMAC: `HMAC-SHA256(secret, sortedFormEncoded(params \ {hmac, signature}))`,
/// hex-encoded, compared against `params["hmac"]`.
///
/// `params` is the raw query-param map exactly as delivered; the
/// verifier does not re-escape values the caller already decoded.
pub fn verify_query_hmac(secret: &str, params: &[(String, String)]) -> Result<(), HmacVerifyError> {
    let Some(supplied) = params.iter().find(|(k, _)| k == "hmac").map(|(_, v)| v.clone()) else {
        return Err(HmacVerifyError::Missing);
    };

    let mut filtered: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "hmac" && k != "signature")
        .collect();
    filtered.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = filtered
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), supplied.as_bytes()) {
        Ok(())
    } else {
        Err(HmacVerifyError::Invalid)
    }
}

/// Verifies a raw-body HMAC: `HMAC-SHA256(secret, rawBody)`, base64-encoded,
/// compared against the `x-shopify-hmac-sha256` header value.
pub fn verify_body_hmac(secret: &str, raw_body: &[u8], supplied_header: Option<&str>) -> Result<(), HmacVerifyError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let Some(supplied) = supplied_header else {
        return Err(HmacVerifyError::Missing);
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    let expected = STANDARD.encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), supplied.as_bytes()) {
        Ok(())
    } else {
        Err(HmacVerifyError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_hmac_missing_when_absent() {
        let params = vec![("a".to_string(), "1".to_string())];
        assert_eq!(verify_query_hmac("secret", &params), Err(HmacVerifyError::Missing));
    }

    #[test]
    fn query_hmac_round_trip() {
        let secret = "shhh";
        let params = vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())];

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"a=1&b=2");
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut signed = params.clone();
        signed.push(("hmac".to_string(), sig));
        assert!(verify_query_hmac(secret, &signed).is_ok());
    }

    #[test]
    fn query_hmac_rejects_tampered_param() {
        let secret = "shhh";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"a=1&b=2");
        let sig = hex::encode(mac.finalize().into_bytes());

        let tampered = vec![
            ("a".to_string(), "9".to_string()),
            ("b".to_string(), "2".to_string()),
            ("hmac".to_string(), sig),
        ];
        assert_eq!(verify_query_hmac(secret, &tampered), Err(HmacVerifyError::Invalid));
    }

    #[test]
    fn body_hmac_round_trip() {
        let secret = "shhh";
        let body = b"{\"order_id\":123}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        assert!(verify_body_hmac(secret, body, Some(&sig)).is_ok());
    }

    #[test]
    fn body_hmac_missing_header() {
        assert_eq!(verify_body_hmac("secret", b"payload", None), Err(HmacVerifyError::Missing));
    }
}
