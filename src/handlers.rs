use crate::config::Config;
use crate::gateway::{EventGateway, SubmitOutcome};
use crate::models::{EventBatchResponse, EventDisposition, EventPayload};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bridge into the worker context.
    pub gateway: Arc<EventGateway>,
    /// Application configuration.
    pub config: Config,
}

/// Health check endpoint.
///
/// Returns the service status, version, and gateway state.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-osint-bot",
            "version": "0.1.0",
            "gateway": state.gateway.state().as_str(),
        })),
    )
}

/// POST /api/v1/events
///
/// Inbound entry point for chat events. Accepts a single event object or an
/// array of events and hands each one to the worker context. The response
/// distinguishes accepted, not-ready and processing-error per event so the
/// transport can retry later without data loss.
pub async fn inbound_events(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EventPayload>,
) -> (StatusCode, Json<EventBatchResponse>) {
    let events = payload.into_events();
    let total_received = events.len();
    tracing::info!("Received {} inbound event(s)", total_received);

    let mut accepted = 0;
    let mut rejected = 0;
    let mut dispositions = Vec::with_capacity(total_received);

    for event in events {
        let disposition = match state.gateway.submit(event).await {
            SubmitOutcome::Accepted => {
                accepted += 1;
                EventDisposition::Accepted
            }
            SubmitOutcome::AcceptedUnconfirmed => {
                accepted += 1;
                EventDisposition::AcceptedUnconfirmed
            }
            SubmitOutcome::NotReady => {
                rejected += 1;
                EventDisposition::NotReady
            }
            SubmitOutcome::Rejected => {
                rejected += 1;
                EventDisposition::ProcessingError
            }
        };
        dispositions.push(disposition);
    }

    tracing::info!(
        "Event hand-off complete: {} received, {} accepted, {} rejected",
        total_received,
        accepted,
        rejected
    );

    // All-rejected batches surface as retryable transport failures; any
    // accepted event makes the batch worth a 202.
    let status = if accepted > 0 || total_received == 0 {
        StatusCode::ACCEPTED
    } else if dispositions
        .iter()
        .all(|d| *d == EventDisposition::NotReady)
    {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    let overall = if accepted == total_received {
        "accepted"
    } else {
        "partial"
    };

    (
        status,
        Json(EventBatchResponse {
            status: overall.to_string(),
            received: total_received,
            accepted,
            rejected,
            dispositions,
        }),
    )
}

/// GET /api/v1/diagnostics
///
/// Gateway counters for the administrator. Gated by the X-Admin-Key header.
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let supplied = headers
        .get("X-Admin-Key")
        .or_else(|| headers.get("x-admin-key"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // Constant-time comparison to prevent timing attacks
    if !constant_time_compare(supplied, &state.config.admin_key) {
        tracing::warn!("Diagnostics request with invalid admin key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        );
    }

    let metrics = state.gateway.metrics();
    (
        StatusCode::OK,
        Json(json!({
            "gateway": metrics.state().as_str(),
            "processed_events": metrics.processed(),
        })),
    )
}

/// Constant-time string comparison (basic implementation)
/// For production, consider using a crypto library like `subtle`
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "longer-secret"));
        assert!(!constant_time_compare("", "x"));
    }
}
