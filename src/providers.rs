use crate::circuit_breaker::{create_endpoint_breaker, EndpointBreaker};
use crate::classifier::{blocked_marker, error_marker};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::LookupCategory;
use failsafe::CircuitBreaker;
use moka::future::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// How a raw query is interpolated into a provider request.
///
/// `Param` and `PathSegment` issue GETs; `JsonBody` issues a POST with the
/// query under the named field.
#[derive(Debug, Clone)]
pub enum QueryEncoding {
    Param(&'static str),
    PathSegment,
    JsonBody(&'static str),
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    /// Stable name used for parking, breaker keys and logs.
    pub name: String,
    pub base_url: String,
    pub encoding: QueryEncoding,
}

/// One endpoint/credential pair attempted during failover.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub endpoint: ProviderEndpoint,
    pub credential: Option<String>,
}

impl Candidate {
    /// Log-safe description. Credentials are never logged raw, only an
    /// 8-hex-char SHA-256 prefix for correlation.
    pub fn describe(&self) -> String {
        match &self.credential {
            Some(token) => format!("{}+cred#{}", self.endpoint.name, fingerprint(token)),
            None => self.endpoint.name.clone(),
        }
    }
}

fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Ordered list of candidates for one category, consumed top to bottom by
/// the retry driver. Failover policy lives here, not in transport code.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub candidates: Vec<Candidate>,
}

impl AttemptPlan {
    /// Fallback chain for identity lookups: for each endpoint, each
    /// credential in turn. Endpoints without a credential pool get one
    /// token-less attempt each.
    fn identity_chain(endpoints: &[String], tokens: &[String]) -> Self {
        let mut candidates = Vec::new();
        for (idx, base_url) in endpoints.iter().enumerate() {
            let endpoint = ProviderEndpoint {
                name: format!("identity-{}", idx + 1),
                base_url: base_url.clone(),
                encoding: QueryEncoding::Param("num"),
            };
            if tokens.is_empty() {
                candidates.push(Candidate {
                    endpoint,
                    credential: None,
                });
            } else {
                for token in tokens {
                    candidates.push(Candidate {
                        endpoint: endpoint.clone(),
                        credential: Some(token.clone()),
                    });
                }
            }
        }
        Self { candidates }
    }

    /// Single fixed endpoint, no fallback chain.
    fn single(name: &str, base_url: &str, encoding: QueryEncoding) -> Self {
        Self {
            candidates: vec![Candidate {
                endpoint: ProviderEndpoint {
                    name: name.to_string(),
                    base_url: base_url.to_string(),
                    encoding,
                },
                credential: None,
            }],
        }
    }
}

/// Result of driving an attempt plan to completion.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched { provider: String, raw: Value },
    Exhausted { attempts: usize, detail: String },
}

/// Verdict on a single candidate attempt.
#[derive(Debug)]
enum AttemptVerdict {
    Usable(Value),
    /// The provider is refusing us (rate limit, geo-block, captcha). Park
    /// the endpoint so the next lookup starts elsewhere.
    Blocked(String),
    /// Transport failure or explicit provider error. Try the next candidate.
    Failed(String),
}

/// Issues outbound lookups against the configured providers with timeout,
/// retry and failover.
pub struct ProviderClient {
    http: reqwest::Client,
    plans: HashMap<LookupCategory, AttemptPlan>,
    /// Endpoints that recently answered "blocked"; skipped until the TTL
    /// expires.
    parked: Cache<String, ()>,
    breakers: HashMap<String, EndpointBreaker>,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create provider client: {}", e))
            })?;

        let mut plans = HashMap::new();
        plans.insert(
            LookupCategory::Identity,
            AttemptPlan::identity_chain(&config.identity_endpoints, &config.identity_tokens),
        );
        plans.insert(
            LookupCategory::Relationship,
            AttemptPlan::single(
                "relationship",
                &config.relationship_url,
                QueryEncoding::Param("id"),
            ),
        );
        plans.insert(
            LookupCategory::Vehicle,
            AttemptPlan::single(
                "vehicle",
                &config.vehicle_url,
                QueryEncoding::Param("vehicle_number"),
            ),
        );
        plans.insert(
            LookupCategory::FinancialCode,
            AttemptPlan::single(
                "financial-code",
                &config.financial_code_url,
                QueryEncoding::JsonBody("code"),
            ),
        );
        plans.insert(
            LookupCategory::SocialProfile,
            AttemptPlan::single(
                "social-profile",
                &config.social_profile_url,
                QueryEncoding::Param("username"),
            ),
        );
        plans.insert(
            LookupCategory::NetworkAddress,
            AttemptPlan::single(
                "network-address",
                &config.network_address_url,
                QueryEncoding::PathSegment,
            ),
        );

        let mut breakers = HashMap::new();
        for plan in plans.values() {
            for candidate in &plan.candidates {
                breakers
                    .entry(candidate.endpoint.name.clone())
                    .or_insert_with(create_endpoint_breaker);
            }
        }

        let parked = Cache::builder()
            .time_to_live(Duration::from_secs(300))
            .max_capacity(64)
            .build();

        Ok(Self {
            http,
            plans,
            parked,
            breakers,
        })
    }

    /// Drive the category's attempt plan until a candidate yields a usable
    /// payload or the plan is exhausted. Never returns transport errors to
    /// the caller; exhaustion is an ordinary outcome the classifier maps to
    /// `error`.
    pub async fn lookup(&self, category: LookupCategory, query: &str) -> FetchOutcome {
        let Some(plan) = self.plans.get(&category) else {
            return FetchOutcome::Exhausted {
                attempts: 0,
                detail: format!("no provider configured for {}", category),
            };
        };

        let mut attempts = 0;
        let mut last_error = String::new();

        for candidate in &plan.candidates {
            let endpoint_name = &candidate.endpoint.name;

            if self.parked.contains_key(endpoint_name) {
                tracing::debug!("Skipping parked endpoint {}", endpoint_name);
                continue;
            }
            let breaker = self.breakers.get(endpoint_name);
            if let Some(cb) = breaker {
                if !cb.is_call_permitted() {
                    tracing::debug!("Skipping circuit-open endpoint {}", endpoint_name);
                    continue;
                }
            }

            attempts += 1;
            tracing::info!(
                "Lookup attempt {} via {} ({})",
                attempts,
                candidate.describe(),
                category
            );

            match self.attempt(candidate, query).await {
                AttemptVerdict::Usable(raw) => {
                    if let Some(cb) = breaker {
                        let _ = cb.call(|| Ok::<(), String>(()));
                    }
                    tracing::info!("Lookup served by {} after {} attempt(s)", candidate.describe(), attempts);
                    return FetchOutcome::Fetched {
                        provider: candidate.describe(),
                        raw,
                    };
                }
                AttemptVerdict::Blocked(detail) => {
                    tracing::warn!("Endpoint {} blocked us: {}", endpoint_name, detail);
                    if let Some(cb) = breaker {
                        let _ = cb.call(|| Err::<(), String>(detail.clone()));
                    }
                    self.parked.insert(endpoint_name.clone(), ()).await;
                    last_error = detail;
                }
                AttemptVerdict::Failed(detail) => {
                    tracing::warn!("Endpoint {} failed: {}", endpoint_name, detail);
                    if let Some(cb) = breaker {
                        let _ = cb.call(|| Err::<(), String>(detail.clone()));
                    }
                    last_error = detail;
                }
            }
        }

        if last_error.is_empty() {
            last_error = "all candidates parked or circuit-open".to_string();
        }
        tracing::error!(
            "Lookup exhausted for {} after {} attempt(s): {}",
            category,
            attempts,
            last_error
        );
        FetchOutcome::Exhausted {
            attempts,
            detail: last_error,
        }
    }

    async fn attempt(&self, candidate: &Candidate, query: &str) -> AttemptVerdict {
        let request = match self.build_request(candidate, query) {
            Ok(req) => req,
            Err(e) => return AttemptVerdict::Failed(e.to_string()),
        };

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return AttemptVerdict::Failed(format!("transport: {}", e)),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 403 {
            return AttemptVerdict::Blocked(format!("HTTP {}", status));
        }
        if !status.is_success() {
            return AttemptVerdict::Failed(format!("HTTP {}", status));
        }

        let raw: Value = match response.json().await {
            Ok(value) => value,
            Err(e) => return AttemptVerdict::Failed(format!("invalid JSON: {}", e)),
        };

        if let Some(detail) = blocked_marker(&raw) {
            return AttemptVerdict::Blocked(detail);
        }
        if let Some(detail) = error_marker(&raw) {
            return AttemptVerdict::Failed(detail);
        }

        AttemptVerdict::Usable(raw)
    }

    fn build_request(
        &self,
        candidate: &Candidate,
        query: &str,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let base = &candidate.endpoint.base_url;
        match &candidate.endpoint.encoding {
            QueryEncoding::Param(param) => {
                // Proper parameter encoding so the raw user input cannot
                // smuggle extra query parameters.
                let mut params: Vec<(&str, &str)> = vec![(param, query)];
                if let Some(token) = &candidate.credential {
                    params.push(("token", token.as_str()));
                }
                let url = reqwest::Url::parse_with_params(base, &params)
                    .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
                Ok(self.http.get(url))
            }
            QueryEncoding::PathSegment => {
                let mut url = reqwest::Url::parse(base)
                    .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
                url.path_segments_mut()
                    .map_err(|_| {
                        AppError::ExternalApiError(format!("URL cannot take a path: {}", base))
                    })?
                    .push(query);
                Ok(self.http.get(url))
            }
            QueryEncoding::JsonBody(field) => {
                let url = reqwest::Url::parse(base)
                    .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
                let mut body = serde_json::Map::new();
                body.insert((*field).to_string(), Value::String(query.to_string()));
                let mut request = self.http.post(url).json(&Value::Object(body));
                if let Some(token) = &candidate.credential {
                    request = request.header("Authorization", format!("Bearer {}", token));
                }
                Ok(request)
            }
        }
    }
}
