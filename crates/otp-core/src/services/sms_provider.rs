//! SMS provider adapter contract (§4.3/C3).
//!
//! A fuller contract than a single `send_otp` call: `send`/`poll`/
//! `parse_receipt`, immutable `name`/`priority`, and a canonical
//! delivery-status vocabulary every adapter normalizes onto. Adapters
//! never retry internally — that is the router/worker's job (§4.3).

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub message_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedReceipt {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
}

/// A single SMS gateway adapter. `name`/`priority` are immutable for
/// the adapter's lifetime; [`SMSRouter`](super::sms_router::SmsRouter)
/// sorts providers by ascending priority once, at construction.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> i32;

    /// Sends `message` to `to`. A transport exception must be caught
    /// by the adapter and reported as `SendResult { success: false, .. }`
    /// — the router treats a thrown error and a returned failure
    /// identically, but the two are kept distinguishable in the
    /// adapter's own error handling so tests can synthesize either.
    async fn send(&self, to: &str, message: &str, delivery_callback_url: Option<&str>) -> SendResult;

    async fn poll(&self, message_id: &str) -> DeliveryStatus;

    /// Parses a provider-specific delivery-receipt payload into the
    /// canonical vocabulary. Returns `None` if the payload cannot be
    /// parsed (an unauthenticated or malformed DLR is logged and
    /// dropped by the webhook handler, not trusted — §9 Open Questions).
    fn parse_receipt(&self, payload: &str) -> Option<ParsedReceipt>;
}

/// `sms.to` REST gateway adapter.
pub struct SmsToProvider {
    api_key: String,
    sender_id: String,
    priority: i32,
    client: reqwest::Client,
}

impl SmsToProvider {
    pub fn new(api_key: impl Into<String>, sender_id: impl Into<String>, priority: i32) -> Self {
        Self { api_key: api_key.into(), sender_id: sender_id.into(), priority, client: reqwest::Client::new() }
    }
}

#[derive(serde::Deserialize)]
struct SmsToSendResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl SmsProvider for SmsToProvider {
    fn name(&self) -> &str {
        "sms_to"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn send(&self, to: &str, message: &str, delivery_callback_url: Option<&str>) -> SendResult {
        let mut body = serde_json::json!({
            "to": to,
            "message": message,
            "sender_id": self.sender_id,
        });
        if let Some(url) = delivery_callback_url {
            body["callback_url"] = serde_json::Value::String(url.to_string());
        }

        let response = self
            .client
            .post("https://api.sms.to/sms/send")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(response) => match response.json::<SmsToSendResponse>().await {
                Ok(parsed) if parsed.success => {
                    SendResult { success: true, message_id: parsed.message_id.unwrap_or_default(), error: None }
                }
                Ok(parsed) => SendResult { success: false, message_id: String::new(), error: parsed.error },
                Err(e) => SendResult { success: false, message_id: String::new(), error: Some(e.to_string()) },
            },
            Err(e) => SendResult { success: false, message_id: String::new(), error: Some(e.to_string()) },
        }
    }

    async fn poll(&self, message_id: &str) -> DeliveryStatus {
        let response = self
            .client
            .get(format!("https://api.sms.to/sms/{}/status", message_id))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match response.ok().and_then(|r| r.error_for_status().ok()) {
            Some(_) => DeliveryStatus::Sent,
            None => DeliveryStatus::Failed,
        }
    }

    fn parse_receipt(&self, payload: &str) -> Option<ParsedReceipt> {
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let message_id = value.get("message_id")?.as_str()?.to_string();
        let raw_status = value.get("status")?.as_str()?;
        let status = match raw_status {
            "delivered" => DeliveryStatus::Delivered,
            "sent" | "submitted" => DeliveryStatus::Sent,
            "failed" | "undelivered" | "rejected" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Pending,
        };
        let failure_reason = value.get("error").and_then(|v| v.as_str()).map(|s| s.to_string());
        Some(ParsedReceipt { message_id, status, failure_reason })
    }
}

/// Twilio adapter.
pub struct TwilioProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    priority: i32,
    client: reqwest::Client,
}

impl TwilioProvider {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>, from_number: impl Into<String>, priority: i32) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            priority,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(serde::Deserialize)]
struct TwilioMessageResponse {
    sid: Option<String>,
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl SmsProvider for TwilioProvider {
    fn name(&self) -> &str {
        "twilio"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn send(&self, to: &str, message: &str, delivery_callback_url: Option<&str>) -> SendResult {
        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json", self.account_sid);
        let mut form = vec![("To", to.to_string()), ("From", self.from_number.clone()), ("Body", message.to_string())];
        if let Some(callback) = delivery_callback_url {
            form.push(("StatusCallback", callback.to_string()));
        }

        let response = self.client.post(&url).basic_auth(&self.account_sid, Some(&self.auth_token)).form(&form).send().await;

        match response {
            Ok(response) if response.status().is_success() => match response.json::<TwilioMessageResponse>().await {
                Ok(parsed) => SendResult { success: true, message_id: parsed.sid.unwrap_or_default(), error: None },
                Err(e) => SendResult { success: false, message_id: String::new(), error: Some(e.to_string()) },
            },
            Ok(response) => {
                let body = response.json::<TwilioMessageResponse>().await.ok();
                SendResult { success: false, message_id: String::new(), error: body.and_then(|b| b.message) }
            }
            Err(e) => SendResult { success: false, message_id: String::new(), error: Some(e.to_string()) },
        }
    }

    async fn poll(&self, message_id: &str) -> DeliveryStatus {
        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{}/Messages/{}.json", self.account_sid, message_id);
        let response = self.client.get(&url).basic_auth(&self.account_sid, Some(&self.auth_token)).send().await;
        match response.ok().and_then(|r| r.error_for_status().ok()) {
            Some(_) => DeliveryStatus::Sent,
            None => DeliveryStatus::Failed,
        }
    }

    fn parse_receipt(&self, payload: &str) -> Option<ParsedReceipt> {
        // Twilio posts status callbacks as form-encoded bodies, not JSON;
        // the webhook handler decodes the form first and hands this
        // function a small JSON object built from it.
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let message_id = value.get("MessageSid")?.as_str()?.to_string();
        let raw_status = value.get("MessageStatus")?.as_str()?;
        let status = match raw_status {
            "delivered" => DeliveryStatus::Delivered,
            "sent" | "queued" | "sending" | "accepted" => DeliveryStatus::Sent,
            "failed" | "undelivered" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Pending,
        };
        let failure_reason = value.get("ErrorMessage").and_then(|v| v.as_str()).map(|s| s.to_string());
        Some(ParsedReceipt { message_id, status, failure_reason })
    }
}

/// In-memory adapter for tests: configurable success/failure and an
/// optional artificial latency.
#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub struct MockProvider {
        name: String,
        priority: i32,
        succeed: bool,
        pub calls: AtomicU32,
        pub last_receipt: Mutex<Option<String>>,
    }

    impl MockProvider {
        pub fn new(name: impl Into<String>, priority: i32, succeed: bool) -> Self {
            Self { name: name.into(), priority, succeed, calls: AtomicU32::new(0), last_receipt: Mutex::new(None) }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SmsProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn send(&self, _to: &str, _message: &str, _delivery_callback_url: Option<&str>) -> SendResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                SendResult { success: true, message_id: format!("{}-{}", self.name, uuid::Uuid::new_v4()), error: None }
            } else {
                SendResult { success: false, message_id: String::new(), error: Some(format!("{} unavailable", self.name)) }
            }
        }

        async fn poll(&self, _message_id: &str) -> DeliveryStatus {
            DeliveryStatus::Sent
        }

        fn parse_receipt(&self, payload: &str) -> Option<ParsedReceipt> {
            *self.last_receipt.lock().unwrap() = Some(payload.to_string());
            Some(ParsedReceipt { message_id: payload.to_string(), status: DeliveryStatus::Delivered, failure_reason: None })
        }
    }
}
