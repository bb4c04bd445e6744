//! End-to-end HTTP coverage for the gateway's §6 surface, composed the
//! same way `main.rs` does but against in-memory/mock dependencies so
//! no network egress is required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::{TestServer, TestServerConfig, Transport};
use otp_core::directory_client::InMemoryDirectoryClient;
use otp_core::services::otp_engine::{OtpEngine, OtpEngineConfig};
use otp_core::services::orchestrator::AuthOrchestrator;
use otp_core::services::rate_limiter::{RateLimiter, RateLimiterConfig};
use otp_core::services::settings::SettingsProvider;
use otp_core::services::sms_provider::mock::MockProvider;
use otp_core::services::sms_provider::SmsProvider;
use otp_core::services::sms_queue::{JobQueue, SmsWorker};
use otp_core::services::sms_router::SmsRouter;
use otp_core::services::sso_minter::SsoTokenMinter;
use otp_store::{InMemoryStore, KeyedStore};
use otp_telemetry::SystemClock;
use serde_json::{json, Value};

fn test_server() -> (TestServer, Arc<dyn KeyedStore>, Arc<SmsRouter>) {
    let store: Arc<dyn KeyedStore> = Arc::new(InMemoryStore::new());
    let provider: Arc<dyn SmsProvider> = Arc::new(MockProvider::new("mock", 1, true));
    let sms_router = Arc::new(SmsRouter::new(vec![provider], store.clone(), Arc::new(SystemClock)));

    let queue = JobQueue::new(store.clone());
    let worker = SmsWorker::new(queue.clone(), sms_router.clone());
    tokio::spawn(async move { worker.run().await });

    let otp_engine = Arc::new(OtpEngine::new(store.clone(), OtpEngineConfig::default()));
    let directory = Arc::new(InMemoryDirectoryClient::new());
    let minter = Arc::new(SsoTokenMinter::new("shop.example.com", "super-secret-test-value"));
    let settings = Arc::new(SettingsProvider::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(store.clone(), RateLimiterConfig { window: Duration::from_secs(60), max_requests: 1000 }));

    let orchestrator = Arc::new(AuthOrchestrator::new(store.clone(), otp_engine, queue, directory, minter, settings.clone(), HashMap::new()));

    let state = otp_api::AppState {
        orchestrator,
        settings,
        rate_limiter,
        sms_router: sms_router.clone(),
        store: store.clone(),
        webhook_secrets: HashMap::new(),
        oauth_redirect_uris: HashMap::new(),
    };

    let app = otp_api::app(state);
    // `rate_limit_middleware` extracts `ConnectInfo<SocketAddr>`, which
    // only the real-socket transport populates — the default mock
    // transport never sets it.
    let config = TestServerConfig { transport: Some(Transport::HttpRandomPort), ..TestServerConfig::default() };
    let server = TestServer::new_with_config(app, config).expect("test server builds");
    (server, store, sms_router)
}

/// Reads the currently-pending login OTP straight out of the store,
/// the same key `OtpEngine` uses internally — the code is never
/// returned over HTTP, so tests that need it read it the way the
/// "customer's phone" would know it, minus the SMS hop.
async fn read_pending_login_code(store: &Arc<dyn KeyedStore>, phone: &str) -> String {
    let raw = store.get_raw(&format!("otp:{phone}")).await.unwrap().expect("otp record exists");
    let record: Value = serde_json::from_str(&raw).unwrap();
    record["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (server, _store, _router) = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn phone_otp_send_then_verify_mints_multipass_url() {
    let (server, store, _router) = test_server();
    let phone = "+15551230001";

    let send = server.post("/api/auth/sms/send").json(&json!({ "phone": phone })).await;
    send.assert_status_ok();
    let send_body: Value = send.json();
    assert_eq!(send_body["success"], true);
    assert!(send_body["cooldown_seconds"].as_u64().unwrap() > 0);

    let code = read_pending_login_code(&store, phone).await;

    let verify = server
        .post("/api/auth/sms/verify")
        .json(&json!({ "phone": phone, "code": code, "return_to": "https://shop.example.com/cart" }))
        .await;
    verify.assert_status_ok();
    let verify_body: Value = verify.json();
    assert_eq!(verify_body["success"], true);
    assert!(verify_body["multipass_url"].as_str().unwrap().contains("/account/login/multipass/"));
}

#[tokio::test]
async fn phone_otp_verify_rejects_wrong_code() {
    let (server, _store, _router) = test_server();
    let phone = "+15551230002";

    server.post("/api/auth/sms/send").json(&json!({ "phone": phone })).await.assert_status_ok();

    let verify = server.post("/api/auth/sms/verify").json(&json!({ "phone": phone, "code": "000000" })).await;
    assert_eq!(verify.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = verify.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
}

#[tokio::test]
async fn phone_otp_resend_within_cooldown_is_rate_limited_with_retry_after() {
    let (server, _store, _router) = test_server();
    let phone = "+15551230003";

    server.post("/api/auth/sms/send").json(&json!({ "phone": phone })).await.assert_status_ok();
    let second = server.post("/api/auth/sms/send").json(&json!({ "phone": phone })).await;
    assert_eq!(second.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn email_login_creates_account_on_first_attempt_and_rejects_weak_password() {
    let (server, _store, _router) = test_server();

    let weak = server
        .post("/api/auth/email/login")
        .json(&json!({ "email": "weak@example.com", "password": "short" }))
        .await;
    assert_eq!(weak.status_code(), StatusCode::BAD_REQUEST);

    let created = server
        .post("/api/auth/email/login")
        .json(&json!({ "email": "new@example.com", "password": "Str0ng!Passw0rd" }))
        .await;
    created.assert_status_ok();
    let created_body: Value = created.json();
    assert_eq!(created_body["success"], true);

    let wrong = server
        .post("/api/auth/email/login")
        .json(&json!({ "email": "new@example.com", "password": "Totally!Wr0ngPass" }))
        .await;
    assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_settings_round_trip_and_rejects_disabling_every_method() {
    let (server, _store, _router) = test_server();

    let initial = server.get("/api/admin/settings").await;
    initial.assert_status_ok();
    let mut settings: Value = initial.json();
    assert_eq!(settings["enabled_methods"]["sms"], true);

    settings["enabled_methods"]["google"] = json!(true);
    settings["ui_customization"]["primary_color"] = json!("#ff0000");
    let updated = server.put("/api/admin/settings").json(&settings).await;
    updated.assert_status_ok();

    let refetched = server.get("/api/admin/settings").await;
    let refetched_body: Value = refetched.json();
    assert_eq!(refetched_body["enabled_methods"]["google"], true);
    assert_eq!(refetched_body["ui_customization"]["primary_color"], "#ff0000");

    let mut disable_all = refetched_body.clone();
    disable_all["enabled_methods"]["sms"] = json!(false);
    disable_all["enabled_methods"]["email"] = json!(false);
    disable_all["enabled_methods"]["google"] = json!(false);
    let rejected = server.put("/api/admin/settings").json(&disable_all).await;
    assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sms_delivery_receipt_webhook_updates_delivery_record() {
    let (server, _store, sms_router) = test_server();

    let outcome = sms_router.send("+15551230099", "+15551230099", "hi", None).await;
    assert!(outcome.success);

    let dlr = server
        .post("/api/webhooks/sms-dlr")
        .add_query_param("provider", "mock")
        .bytes(outcome.message_id.clone().into())
        .await;
    dlr.assert_status_ok();

    let record = sms_router.get_delivery_record(&outcome.message_id).await.unwrap();
    assert_eq!(record.status, otp_core::services::sms_router::RecordStatus::Delivered);
}

#[tokio::test]
async fn unknown_oauth_provider_is_rejected() {
    let (server, _store, _router) = test_server();
    let response = server.get("/api/auth/oauth/not-a-real-provider").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
