/// Gateway lifecycle tests: state machine, hand-off, worker dialogue state,
/// admin gating and drain-on-shutdown.
use async_trait::async_trait;
use rust_osint_bot::config::Config;
use rust_osint_bot::engine::LookupEngine;
use rust_osint_bot::errors::AppError;
use rust_osint_bot::gateway::{EventGateway, GatewayState, SubmitOutcome};
use rust_osint_bot::ledger::CreditLedger;
use rust_osint_bot::models::{InboundEvent, UserRecord};
use rust_osint_bot::providers::ProviderClient;
use rust_osint_bot::rate_limiter::RateLimiter;
use rust_osint_bot::store::{AuditLog, InMemoryAuditLog, InMemoryUserStore, KeyLocks, UserStore};
use rust_osint_bot::transport::Notifier;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    async fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, user_key: &str, text: &str) -> Result<(), AppError> {
        self.messages
            .lock()
            .await
            .push((user_key.to_string(), text.to_string()));
        Ok(())
    }
}

fn test_config(base: &str) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        chat_api_base: "https://chat.example".to_string(),
        chat_api_token: "test_token".to_string(),
        admin_key: "admin-1".to_string(),
        lookup_cost: 1,
        free_allowance: 2,
        cooldown_secs: 0,
        daily_cap: 100,
        provider_timeout_secs: 5,
        identity_endpoints: vec![format!("{}/identity-a", base)],
        identity_tokens: vec![],
        relationship_url: format!("{}/family", base),
        vehicle_url: format!("{}/vehicle", base),
        financial_code_url: format!("{}/fincode", base),
        social_profile_url: format!("{}/social", base),
        network_address_url: format!("{}/ip", base),
        phone_region: "IN".to_string(),
    }
}

struct Harness {
    gateway: Arc<EventGateway>,
    engine: Arc<LookupEngine>,
    store: Arc<InMemoryUserStore>,
    audit: Arc<InMemoryAuditLog>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn start(&self, config: &Config) {
        self.gateway
            .start(self.engine.clone(), config.admin_key.clone(), 64);
    }
}

/// Builds a gateway with its engine wired to the mock server but does NOT
/// start the worker context.
fn build_harness(config: &Config) -> Harness {
    let store = Arc::new(InMemoryUserStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let store_dyn: Arc<dyn UserStore> = store.clone();
    let audit_dyn: Arc<dyn AuditLog> = audit.clone();
    let locks = Arc::new(KeyLocks::new());

    let ledger = CreditLedger::new(
        store_dyn.clone(),
        locks.clone(),
        config.lookup_cost,
        config.free_allowance,
    );
    let limiter = RateLimiter::new(
        store_dyn.clone(),
        locks,
        Duration::from_secs(config.cooldown_secs),
        config.daily_cap,
        config.free_allowance,
    );
    let providers = Arc::new(ProviderClient::new(config).unwrap());

    let engine = Arc::new(LookupEngine::new(
        store_dyn,
        ledger,
        limiter,
        providers,
        audit_dyn,
        notifier.clone(),
        &config.phone_region,
    ));

    let gateway = Arc::new(EventGateway::new(Duration::from_millis(500)));
    Harness {
        gateway,
        engine,
        store,
        audit,
        notifier,
    }
}

fn event(value: serde_json::Value) -> InboundEvent {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_not_ready_until_started_then_accepts() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);

    let select = event(json!({
        "user": "u-1",
        "type": "category_selected",
        "category": "identity-lookup"
    }));

    assert_eq!(harness.gateway.state(), GatewayState::Uninitialized);
    assert_eq!(
        harness.gateway.submit(select.clone()).await,
        SubmitOutcome::NotReady
    );

    harness.start(&config);
    assert_eq!(harness.gateway.state(), GatewayState::Ready);
    assert_eq!(harness.gateway.submit(select).await, SubmitOutcome::Accepted);

    harness.gateway.shutdown().await;
    let messages = harness.notifier.messages().await;
    assert!(messages
        .iter()
        .any(|(user, text)| user == "u-1" && text.contains("Send the")));
}

#[tokio::test]
async fn test_full_dialogue_through_gateway() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "J DOE",
            "address": "12 Example Road"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    let outcomes = vec![
        harness
            .gateway
            .submit(event(json!({
                "user": "u-1",
                "type": "category_selected",
                "category": "identity-lookup"
            })))
            .await,
        harness
            .gateway
            .submit(event(json!({
                "user": "u-1",
                "type": "query",
                "text": "target@example.com"
            })))
            .await,
    ];
    for outcome in outcomes {
        assert!(matches!(
            outcome,
            SubmitOutcome::Accepted | SubmitOutcome::AcceptedUnconfirmed
        ));
    }

    harness.gateway.shutdown().await;

    // Free allowance covered the lookup; one audit entry was written.
    assert_eq!(harness.audit.entries().await.len(), 1);
    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.free_uses, 1);
    assert_eq!(record.balance, 0);

    let messages = harness.notifier.messages().await;
    assert!(messages.iter().any(|(_, text)| text.contains("J DOE")));
}

#[tokio::test]
async fn test_query_without_category_prompts_selection() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    harness
        .gateway
        .submit(event(json!({
            "user": "u-1",
            "type": "query",
            "text": "target@example.com"
        })))
        .await;

    harness.gateway.shutdown().await;

    let messages = harness.notifier.messages().await;
    assert!(messages
        .iter()
        .any(|(_, text)| text.contains("Select a lookup category")));
    // No charge, no audit noise.
    assert!(harness.audit.entries().await.is_empty());
}

#[tokio::test]
async fn test_sequential_same_user_lookups_do_not_interleave() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "J DOE"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    // Two complete dialogues queued back to back while the first lookup is
    // still in flight.
    for _ in 0..2 {
        harness
            .gateway
            .submit(event(json!({
                "user": "u-1",
                "type": "category_selected",
                "category": "identity-lookup"
            })))
            .await;
        harness
            .gateway
            .submit(event(json!({
                "user": "u-1",
                "type": "query",
                "text": "target@example.com"
            })))
            .await;
    }

    harness.gateway.shutdown().await;

    // Both lookups ran to completion, one at a time: two free uses spent,
    // two audit entries, no lost update.
    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.free_uses, 0);
    assert_eq!(record.balance, 0);
    assert_eq!(record.total_lookups, 2);
    assert_eq!(harness.audit.entries().await.len(), 2);
}

#[tokio::test]
async fn test_admin_grant_applies_once() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    let grant = json!({
        "user": "admin-1",
        "type": "grant",
        "target": "u-7",
        "amount": 10,
        "grant_id": "6f2cbb34-21c5-4e6f-9c3a-0d6a8f6f2a11"
    });

    // Transport retries the same grant.
    harness.gateway.submit(event(grant.clone())).await;
    harness.gateway.submit(event(grant)).await;

    harness.gateway.shutdown().await;

    let record = harness.store.load("u-7").await.unwrap().unwrap();
    assert_eq!(record.balance, 10);

    let messages = harness.notifier.messages().await;
    assert!(messages.iter().any(|(_, text)| text.contains("Credited 10")));
    assert!(messages
        .iter()
        .any(|(_, text)| text.contains("already applied")));
}

#[tokio::test]
async fn test_non_admin_cannot_grant() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    harness
        .gateway
        .submit(event(json!({
            "user": "u-1",
            "type": "grant",
            "target": "u-1",
            "amount": 999,
            "grant_id": "0f2cbb34-21c5-4e6f-9c3a-0d6a8f6f2a99"
        })))
        .await;

    harness.gateway.shutdown().await;

    // The grant never ran; the target account was not even created.
    assert!(harness.store.load("u-1").await.unwrap().is_none()
        || harness.store.load("u-1").await.unwrap().unwrap().balance == 0);

    let messages = harness.notifier.messages().await;
    assert!(messages
        .iter()
        .any(|(_, text)| text.contains("not allowed")));
}

#[tokio::test]
async fn test_balance_and_diagnostics_events() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);

    let mut record = UserRecord::new("u-1", 0);
    record.balance = 7;
    harness.store.upsert(&record).await.unwrap();

    harness.start(&config);

    // A user reads their own balance; the admin pulls diagnostics.
    harness
        .gateway
        .submit(event(json!({"user": "u-1", "type": "balance"})))
        .await;
    harness
        .gateway
        .submit(event(json!({"user": "admin-1", "type": "diagnostics"})))
        .await;
    // A non-admin asking for diagnostics is turned away.
    harness
        .gateway
        .submit(event(json!({"user": "u-2", "type": "diagnostics"})))
        .await;

    harness.gateway.shutdown().await;

    let messages = harness.notifier.messages().await;
    assert!(messages
        .iter()
        .any(|(user, text)| user == "u-1" && text.contains("Balance: 7")));
    assert!(messages
        .iter()
        .any(|(user, text)| user == "admin-1" && text.contains("Gateway: ready")));
    assert!(messages
        .iter()
        .any(|(user, text)| user == "u-2" && text.contains("not allowed")));
}

#[tokio::test]
async fn test_shutdown_drains_then_rejects() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri());
    let harness = build_harness(&config);
    harness.start(&config);

    for i in 0..5 {
        harness
            .gateway
            .submit(event(json!({
                "user": format!("u-{}", i),
                "type": "category_selected",
                "category": "vehicle"
            })))
            .await;
    }

    harness.gateway.shutdown().await;
    assert_eq!(harness.gateway.state(), GatewayState::Stopped);

    // Every queued event was processed before the worker exited.
    assert_eq!(harness.gateway.metrics().processed(), 5);
    assert_eq!(harness.notifier.messages().await.len(), 5);

    // New events are rejected after shutdown.
    let outcome = harness
        .gateway
        .submit(event(json!({
            "user": "u-9",
            "type": "category_selected",
            "category": "vehicle"
        })))
        .await;
    assert_eq!(outcome, SubmitOutcome::NotReady);
}
