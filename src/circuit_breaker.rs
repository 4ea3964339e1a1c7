use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type for a single provider endpoint. Nameable so a pool of them
/// can live in a map keyed by endpoint name.
pub type EndpointBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for one provider endpoint.
///
/// External lookup vendors fail in bursts (geo-blocks, expired credentials,
/// upstream outages); the breaker stops the retry driver from burning its
/// per-attempt timeout on an endpoint that has failed repeatedly.
///
/// # Configuration
///
/// - **Failure threshold**: 3 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 30s to 300s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, attempts pass through.
/// - **OPEN**: Too many failures, the endpoint is skipped.
/// - **HALF_OPEN**: Testing if the endpoint recovered.
pub fn create_endpoint_breaker() -> EndpointBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(30),  // Initial delay
        Duration::from_secs(300), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(3, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
