//! Order-confirmation OTP gate and SMS templating (§4.8/C8).
//!
//! Reuses [`OtpEngine`](super::otp_engine::OtpEngine) under
//! `Purpose::OrderConfirmation` — a distinct key family and no
//! interaction with the login failure counter — and adds the
//! placeholder-rendering helper the associated confirmation SMS needs.

use std::sync::Arc;

use super::otp_engine::{OtpEngine, OtpError, Purpose, VerifyOutcome};

#[derive(Debug, Clone, Default)]
pub struct OrderContext {
    pub order_number: String,
    pub order_id: String,
    pub order_total: String,
    pub customer_first_name: Option<String>,
    pub customer_last_name: Option<String>,
    pub customer_email: Option<String>,
}

pub struct OrderConfirmationEngine {
    otp: Arc<OtpEngine>,
}

impl OrderConfirmationEngine {
    pub fn new(otp: Arc<OtpEngine>) -> Self {
        Self { otp }
    }

    pub async fn issue(&self, order_id: &str) -> Result<String, OtpError> {
        self.otp.issue(Purpose::OrderConfirmation, order_id).await
    }

    pub async fn verify(&self, order_id: &str, candidate: &str) -> Result<VerifyOutcome, OtpError> {
        self.otp.verify(Purpose::OrderConfirmation, order_id, candidate).await
    }

    /// Renders `template` against `context`. Missing fields collapse
    /// to empty strings; runs of whitespace left behind by empty
    /// substitutions are normalized to a single space (§4.8).
    pub fn render_template(template: &str, context: &OrderContext) -> String {
        let rendered = template
            .replace("{order.number}", &context.order_number)
            .replace("{order.id}", &context.order_id)
            .replace("{order.total}", &context.order_total)
            .replace("{customer.firstName}", context.customer_first_name.as_deref().unwrap_or(""))
            .replace("{customer.lastName}", context.customer_last_name.as_deref().unwrap_or(""))
            .replace("{customer.email}", context.customer_email.as_deref().unwrap_or(""));

        rendered.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_store::InMemoryStore;
    use crate::services::otp_engine::OtpEngineConfig;

    fn engine() -> OrderConfirmationEngine {
        OrderConfirmationEngine::new(Arc::new(OtpEngine::new(Arc::new(InMemoryStore::new()), OtpEngineConfig::default())))
    }

    #[tokio::test]
    async fn verify_succeeds_only_for_the_issuing_order_id() {
        let engine = engine();
        let code_o1 = engine.issue("O1").await.unwrap();
        assert_eq!(engine.verify("O2", &code_o1).await.unwrap(), VerifyOutcome::Expired);
        assert_eq!(engine.verify("O1", &code_o1).await.unwrap(), VerifyOutcome::Ok);
    }

    #[tokio::test]
    async fn codes_are_not_fungible_across_orders() {
        let engine = engine();
        let _ = engine.issue("O1").await.unwrap();
        let code_o2 = engine.issue("O2").await.unwrap();
        assert_eq!(engine.verify("O1", &code_o2).await.unwrap(), VerifyOutcome::Mismatch);
    }

    #[test]
    fn missing_customer_fields_collapse_and_whitespace_normalizes() {
        let context = OrderContext {
            order_number: "#1001".to_string(),
            order_id: "O1".to_string(),
            order_total: "$42.00".to_string(),
            customer_first_name: None,
            customer_last_name: None,
            customer_email: None,
        };
        let rendered = OrderConfirmationEngine::render_template("Hi {customer.firstName} {customer.lastName}, order {order.number} shipped.", &context);
        assert_eq!(rendered, "Hi , order #1001 shipped.");
    }

    #[test]
    fn all_placeholders_substitute_when_present() {
        let context = OrderContext {
            order_number: "#1001".to_string(),
            order_id: "O1".to_string(),
            order_total: "$42.00".to_string(),
            customer_first_name: Some("Ada".to_string()),
            customer_last_name: Some("Lovelace".to_string()),
            customer_email: Some("ada@example.com".to_string()),
        };
        let rendered = OrderConfirmationEngine::render_template("{customer.firstName} {customer.lastName} <{customer.email}>: {order.total}", &context);
        assert_eq!(rendered, "Ada Lovelace <ada@example.com>: $42.00");
    }
}
