/// End-to-end work unit tests: rate limit -> debit -> fetch -> classify ->
/// deliver or refund, with mocked providers and an in-memory store.
use async_trait::async_trait;
use rust_osint_bot::config::Config;
use rust_osint_bot::engine::{LookupEngine, WorkOutcome};
use rust_osint_bot::errors::AppError;
use rust_osint_bot::ledger::CreditLedger;
use rust_osint_bot::models::{LookupCategory, UserRecord};
use rust_osint_bot::providers::ProviderClient;
use rust_osint_bot::rate_limiter::RateLimiter;
use rust_osint_bot::store::{AuditLog, InMemoryAuditLog, InMemoryUserStore, KeyLocks, UserStore};
use rust_osint_bot::transport::Notifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Notifier that records everything instead of calling the chat API.
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

fn test_config(base: &str, free_allowance: i64, cooldown_secs: u64) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        chat_api_base: "https://chat.example".to_string(),
        chat_api_token: "test_token".to_string(),
        admin_key: "admin-1".to_string(),
        lookup_cost: 1,
        free_allowance,
        cooldown_secs,
        daily_cap: 100,
        provider_timeout_secs: 5,
        identity_endpoints: vec![
            format!("{}/identity-a", base),
            format!("{}/identity-b", base),
        ],
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
    engine: LookupEngine,
    store: Arc<InMemoryUserStore>,
    audit: Arc<InMemoryAuditLog>,
    notifier: Arc<RecordingNotifier>,
}

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

    let engine = LookupEngine::new(
        store_dyn,
        ledger,
        limiter,
        providers,
        audit_dyn,
        notifier.clone(),
        &config.phone_region,
    );

    Harness {
        engine,
        store,
        audit,
        notifier,
    }
}

async fn seed_account(store: &InMemoryUserStore, user: &str, balance: i64, free_uses: i64) {
    let mut record = UserRecord::new(user, 0);
    record.balance = balance;
    record.free_uses = free_uses;
    store.upsert(&record).await.unwrap();
}

fn mock_valid_identity() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "name": "J DOE",
        "address": "12 Example Road",
        "email": "target@example.com"
    }))
}

#[tokio::test]
async fn test_free_uses_spent_before_balance_with_audit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(mock_valid_identity())
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 2, 0);
    let harness = build_harness(&config);
    seed_account(&harness.store, "u-1", 0, 2).await;

    for _ in 0..2 {
        let outcome = harness
            .engine
            .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
            .await;
        assert_eq!(outcome, WorkOutcome::Delivered);
    }

    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.balance, 0);
    assert_eq!(record.free_uses, 0);
    assert_eq!(record.total_lookups, 2);
    assert_eq!(harness.audit.entries().await.len(), 2);
}

#[tokio::test]
async fn test_empty_response_refunds_and_skips_audit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "result": []
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 0, 0);
    let harness = build_harness(&config);
    seed_account(&harness.store, "u-1", 5, 0).await;

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(outcome, WorkOutcome::NotFound);

    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.balance, 5);
    assert!(harness.audit.entries().await.is_empty());

    let messages = harness.notifier.messages().await;
    assert!(messages
        .iter()
        .any(|(_, text)| text.contains("No records found")));
}

#[tokio::test]
async fn test_provider_exhaustion_refunds_exactly_once() {
    let mock_server = MockServer::start().await;
    for endpoint in ["/identity-a", "/identity-b"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let config = test_config(&mock_server.uri(), 0, 0);
    let harness = build_harness(&config);
    seed_account(&harness.store, "u-1", 5, 0).await;

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(outcome, WorkOutcome::ProviderFailed);

    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.balance, 5);
    assert_eq!(record.free_uses, 0);
    assert!(harness.audit.entries().await.is_empty());
}

#[tokio::test]
async fn test_insufficient_credit_makes_no_external_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(mock_valid_identity())
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 0, 0);
    let harness = build_harness(&config);
    seed_account(&harness.store, "u-1", 0, 0).await;

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(outcome, WorkOutcome::InsufficientCredit);

    let messages = harness.notifier.messages().await;
    assert!(messages.iter().any(|(_, text)| text.contains("no credits")));
}

#[tokio::test]
async fn test_cooldown_blocks_second_lookup() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(mock_valid_identity())
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 0, 60);
    let harness = build_harness(&config);
    seed_account(&harness.store, "u-1", 5, 0).await;

    let first = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(first, WorkOutcome::Delivered);

    let second = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(second, WorkOutcome::RateLimited);

    // Only the first lookup was charged.
    let record = harness.store.load("u-1").await.unwrap().unwrap();
    assert_eq!(record.balance, 4);

    let messages = harness.notifier.messages().await;
    assert!(messages.iter().any(|(_, text)| text.contains("wait")));
}

#[tokio::test]
async fn test_invalid_query_rejected_before_any_spend() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(mock_valid_identity())
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 2, 0);
    let harness = build_harness(&config);

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "definitely not a phone")
        .await;
    assert_eq!(outcome, WorkOutcome::InvalidQuery);

    // No account was created: neither the limiter nor the ledger ran.
    assert!(harness.store.load("u-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_valid_report_is_sanitized_before_delivery() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "credits_left": 12,
            "dev": "@vendorchannel",
            "name": "J DOE",
            "address": "12 Example Road"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 1, 0);
    let harness = build_harness(&config);

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;
    assert_eq!(outcome, WorkOutcome::Delivered);

    let messages = harness.notifier.messages().await;
    let report = &messages.last().unwrap().1;
    assert!(report.contains("J DOE"));
    assert!(!report.contains("vendorchannel"));
    assert!(!report.contains("credits_left"));
}

#[tokio::test]
async fn test_relationship_report_corrects_swapped_parents() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/family"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "family_head": "R DOE",
            // Vendor ships these two swapped.
            "mother_name": "G DOE",
            "father_name": "S DOE"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 1, 0);
    let harness = build_harness(&config);

    let outcome = harness
        .engine
        .run_lookup("u-1", LookupCategory::Relationship, "1234567890")
        .await;
    assert_eq!(outcome, WorkOutcome::Delivered);

    let messages = harness.notifier.messages().await;
    let report = &messages.last().unwrap().1;
    assert!(report.contains("Mother: S DOE"));
    assert!(report.contains("Father: G DOE"));
}

#[tokio::test]
async fn test_audit_records_provider_and_category() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity-a"))
        .respond_with(mock_valid_identity())
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 1, 0);
    let harness = build_harness(&config);

    harness
        .engine
        .run_lookup("u-1", LookupCategory::Identity, "target@example.com")
        .await;

    let entries = harness.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_key, "u-1");
    assert_eq!(entries[0].category, LookupCategory::Identity);
    assert_eq!(entries[0].outcome, "valid");
    assert_eq!(entries[0].provider, "identity-1");
}
