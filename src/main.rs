use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_osint_bot::config::Config;
use rust_osint_bot::db::Database;
use rust_osint_bot::db_storage::{ensure_schema, PgAuditLog, PgUserStore};
use rust_osint_bot::engine::LookupEngine;
use rust_osint_bot::gateway::EventGateway;
use rust_osint_bot::handlers::{self, AppState};
use rust_osint_bot::ledger::CreditLedger;
use rust_osint_bot::providers::ProviderClient;
use rust_osint_bot::rate_limiter::RateLimiter;
use rust_osint_bot::store::{AuditLog, KeyLocks, UserStore};
use rust_osint_bot::transport::{ChatApiClient, Notifier};

/// Resolves when the process receives a shutdown signal.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema check.
/// - Credit ledger, rate limiter and provider client.
/// - The event gateway and its worker context.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server and, on shutdown, drains the gateway so
/// in-flight work units finish before the process exits.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_osint_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    ensure_schema(&db.pool)
        .await
        .map_err(|e| anyhow::anyhow!("schema check failed: {}", e))?;
    tracing::info!("Database connection pool established");

    // Repositories and the per-user lock registry shared by the ledger and
    // the rate limiter (single writer per user key).
    let store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db.pool.clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(PgAuditLog::new(db.pool.clone()));
    let locks = Arc::new(KeyLocks::new());

    let ledger = CreditLedger::new(
        store.clone(),
        locks.clone(),
        config.lookup_cost,
        config.free_allowance,
    );
    let limiter = RateLimiter::new(
        store.clone(),
        locks,
        Duration::from_secs(config.cooldown_secs),
        config.daily_cap,
        config.free_allowance,
    );

    let providers = Arc::new(
        ProviderClient::new(&config)
            .map_err(|e| anyhow::anyhow!("provider client init failed: {}", e))?,
    );
    tracing::info!(
        "Provider client initialized ({} identity endpoint(s))",
        config.identity_endpoints.len()
    );

    let notifier: Arc<dyn Notifier> = Arc::new(
        ChatApiClient::new(config.chat_api_base.clone(), config.chat_api_token.clone())
            .map_err(|e| anyhow::anyhow!("chat client init failed: {}", e))?,
    );
    tracing::info!("Chat transport client initialized: {}", config.chat_api_base);

    let engine = Arc::new(LookupEngine::new(
        store,
        ledger,
        limiter,
        providers,
        audit,
        notifier,
        &config.phone_region,
    ));

    // Start the worker context. Events arriving before this are rejected
    // with a distinguishable not-ready response.
    let gateway = Arc::new(EventGateway::new(Duration::from_millis(500)));
    gateway.start(engine, config.admin_key.clone(), 256);

    // Build application state
    let app_state = Arc::new(AppState {
        gateway: gateway.clone(),
        config: config.clone(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // Inbound chat events
        .route("/api/v1/events", post(handlers::inbound_events))
        // Admin diagnostics
        .route("/api/v1/diagnostics", get(handlers::diagnostics))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB max payload (events are small)
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20 (prevents DDoS)
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the worker context before exiting so in-flight lookups settle
    // their ledger state.
    gateway.shutdown().await;

    Ok(())
}
