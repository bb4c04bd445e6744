//! SSO token minting (§4.6/C6) — a thin orchestration wrapper over
//! `otp_crypto::multipass::MultipassMinter`, adding the synthetic-email
//! substitution spec.md §3 requires for phone-only authentication.

use otp_crypto::multipass::{MintInput, MultipassError, MultipassMinter};

use crate::directory_client::Customer;

/// Parameters an authentication flow has on hand when it is ready to
/// issue a credential; not stored anywhere (§3: "ephemeral, not
/// stored").
#[derive(Debug, Clone, Default)]
pub struct SsoMintRequest {
    pub customer: CustomerIdentity,
    pub return_to: Option<String>,
    pub cart_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerIdentity {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&Customer> for CustomerIdentity {
    fn from(customer: &Customer) -> Self {
        Self {
            id: customer.id.clone(),
            email: Some(customer.email.clone()),
            phone: customer.phone.clone(),
            first_name: customer.first_name.clone(),
            last_name: customer.last_name.clone(),
        }
    }
}

pub struct SsoTokenMinter {
    minter: MultipassMinter,
}

impl SsoTokenMinter {
    pub fn new(shop_domain: impl Into<String>, secret: &str) -> Self {
        Self { minter: MultipassMinter::new(shop_domain, secret) }
    }

    /// Substitutes `<phone>@phone.local` when the customer has no
    /// email on file — phone-only authentication still needs an
    /// `email` field since the wire format requires one (§3).
    fn resolve_email(identity: &CustomerIdentity) -> Option<String> {
        identity.email.clone().or_else(|| identity.phone.as_deref().map(|phone| format!("{phone}@phone.local")))
    }

    pub fn mint(&self, request: &SsoMintRequest) -> Result<String, MultipassError> {
        let email = Self::resolve_email(&request.customer).ok_or(MultipassError::MissingField("email"))?;

        let input = MintInput {
            email,
            created_at: None,
            first_name: request.customer.first_name.clone(),
            last_name: request.customer.last_name.clone(),
            identifier: Some(request.customer.id.clone()),
            return_to: request.return_to.clone(),
            cart_token: request.cart_token.clone(),
        };

        self.minter.mint(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_only_customer_gets_synthetic_email() {
        let minter = SsoTokenMinter::new("shop.example.com", "super-secret");
        let request = SsoMintRequest {
            customer: CustomerIdentity { id: "C1".to_string(), phone: Some("+15551234567".to_string()), ..Default::default() },
            return_to: Some("https://shop.example.com/cart".to_string()),
            ..Default::default()
        };

        let url = minter.mint(&request).unwrap();
        assert!(url.starts_with("https://shop.example.com/account/login/multipass/"));
    }

    #[test]
    fn missing_email_and_phone_is_rejected() {
        let minter = SsoTokenMinter::new("shop.example.com", "super-secret");
        let request = SsoMintRequest { customer: CustomerIdentity { id: "C1".to_string(), ..Default::default() }, ..Default::default() };
        assert!(matches!(minter.mint(&request), Err(MultipassError::MissingField("email"))));
    }

    #[test]
    fn email_customer_is_not_substituted() {
        let minter = SsoTokenMinter::new("shop.example.com", "super-secret");
        let request = SsoMintRequest {
            customer: CustomerIdentity { id: "C1".to_string(), email: Some("real@example.com".to_string()), ..Default::default() },
            ..Default::default()
        };
        assert!(minter.mint(&request).is_ok());
    }
}
