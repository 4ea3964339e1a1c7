/// The lookup work unit and its supporting validation helpers.
///
/// One call to [`LookupEngine::run_lookup`] is a complete work unit:
/// 1. Validate the query for the selected category (free; nothing spent)
/// 2. Consult the rate limiter (slot spent even if the lookup aborts later)
/// 3. Debit the credit ledger
/// 4. Fetch from the provider chain and classify the response
/// 5. valid: sanitize, format, deliver, audit, settle the debit
///    empty/error: refund and tell the user
///
/// Every failure after the debit resolves locally with a refund; the method
/// never returns an error, so a fault can never leak a hanging debit.
use crate::classifier::{self, Classification};
use crate::errors::{AppError, ResultExt};
use crate::formatter;
use crate::ledger::{CreditLedger, DebitOutcome, DebitReceipt};
use crate::models::{AuditRecord, LookupCategory, QueryKind};
use crate::providers::{FetchOutcome, ProviderClient};
use crate::rate_limiter::{AllowDecision, RateLimiter};
use crate::sanitize;
use crate::store::{AuditLog, UserStore};
use crate::transport::Notifier;
use chrono::Utc;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

/// Terminal state of one work unit, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Delivered,
    NotFound,
    ProviderFailed,
    RateLimited,
    CapReached,
    InsufficientCredit,
    InvalidQuery,
    Fault,
}

/// Validate email address format.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // RFC 5322 simplified email regex
    let email_regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    email_regex.is_match(email)
}

/// Validate and normalize a phone number against the configured region.
///
/// Uses the phonenumber library (port of Google's libphonenumber) and
/// returns `(is_valid, normalized_e164_or_error)`.
pub fn validate_phone(raw: &str, region: Option<CountryId>) -> (bool, String) {
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(region, raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("Valid phone: {} -> {}", raw, formatted);
                (true, formatted)
            } else {
                (false, "Invalid phone number".to_string())
            }
        }
        Err(e) => (false, format!("Parse error: {:?}", e)),
    }
}

/// Decide what shape the raw input is before dispatch.
pub fn classify_query(raw: &str, region: Option<CountryId>) -> QueryKind {
    if is_valid_email(raw.trim()) {
        return QueryKind::Email;
    }
    let (valid, _) = validate_phone(raw.trim(), region);
    if valid {
        return QueryKind::Phone;
    }
    QueryKind::Identifier
}

/// Category-specific validation and normalization. Returns the normalized
/// query or a user-facing rejection message. Runs before the rate limiter
/// so garbage input spends neither a slot nor a credit.
pub fn validate_for_category(
    category: LookupCategory,
    raw: &str,
    region: Option<CountryId>,
) -> Result<(String, QueryKind), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("The query is empty. Send the value you want to look up.".to_string());
    }

    match category {
        LookupCategory::Identity => {
            if is_valid_email(trimmed) {
                return Ok((trimmed.to_ascii_lowercase(), QueryKind::Email));
            }
            let (valid, normalized) = validate_phone(trimmed, region);
            if valid {
                return Ok((normalized, QueryKind::Phone));
            }
            Err("Send a valid phone number or e-mail address.".to_string())
        }
        LookupCategory::Relationship => {
            let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.len() >= 6
                && compact.len() <= 20
                && compact.chars().all(|c| c.is_ascii_alphanumeric())
            {
                Ok((compact, QueryKind::Identifier))
            } else {
                Err("Send a valid family identifier.".to_string())
            }
        }
        LookupCategory::Vehicle => {
            let compact: String = trimmed
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_uppercase();
            if compact.len() >= 6 && compact.len() <= 12 {
                Ok((compact, QueryKind::Identifier))
            } else {
                Err("Send a valid registration number, e.g. BR01AB1234.".to_string())
            }
        }
        LookupCategory::FinancialCode => {
            let compact = trimmed.to_ascii_uppercase();
            if compact.len() == 15 && compact.chars().all(|c| c.is_ascii_alphanumeric()) {
                Ok((compact, QueryKind::Identifier))
            } else {
                Err("Send a valid 15-character registration code.".to_string())
            }
        }
        LookupCategory::SocialProfile => {
            let handle = trimmed.trim_start_matches('@');
            let username_regex = Regex::new(r"^[A-Za-z0-9._]{1,30}$").unwrap();
            if username_regex.is_match(handle) {
                Ok((handle.to_string(), QueryKind::Identifier))
            } else {
                Err("Send a valid username.".to_string())
            }
        }
        LookupCategory::NetworkAddress => {
            let ok = trimmed.len() <= 253
                && trimmed
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-'));
            if ok {
                Ok((trimmed.to_string(), QueryKind::Identifier))
            } else {
                Err("Send a valid IP address or hostname.".to_string())
            }
        }
    }
}

/// End-to-end executor for lookup work units and administrative operations.
/// Runs inside the worker context; the only thing it shares with the
/// request-serving side is the ledger's per-key locking.
pub struct LookupEngine {
    store: Arc<dyn UserStore>,
    ledger: CreditLedger,
    limiter: RateLimiter,
    providers: Arc<ProviderClient>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    phone_region: Option<CountryId>,
}

impl LookupEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn UserStore>,
        ledger: CreditLedger,
        limiter: RateLimiter,
        providers: Arc<ProviderClient>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
        phone_region: &str,
    ) -> Self {
        let phone_region = match phone_region.to_ascii_uppercase().parse::<CountryId>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(
                    "Unknown PHONE_REGION '{}', phone validation will use no region hint",
                    phone_region
                );
                None
            }
        };
        Self {
            store,
            ledger,
            limiter,
            providers,
            audit,
            notifier,
            phone_region,
        }
    }

    /// Process one user-triggered lookup to completion.
    pub async fn run_lookup(
        &self,
        user_key: &str,
        category: LookupCategory,
        raw_query: &str,
    ) -> WorkOutcome {
        tracing::info!("Work unit start: user={} category={}", user_key, category);

        // Step 1: validate input
        let (query, kind) = match validate_for_category(category, raw_query, self.phone_region) {
            Ok(validated) => validated,
            Err(message) => {
                self.notify(user_key, &message).await;
                return WorkOutcome::InvalidQuery;
            }
        };
        tracing::debug!("Query accepted as {:?}: {}", kind, query);

        // Step 2: rate limit
        match self.limiter.allow(user_key).await {
            Ok(AllowDecision::Ok) => {}
            Ok(AllowDecision::Cooldown { wait_secs }) => {
                self.notify(
                    user_key,
                    &format!("Please wait {}s before your next search.", wait_secs),
                )
                .await;
                return WorkOutcome::RateLimited;
            }
            Ok(AllowDecision::DailyCapReached) => {
                self.notify(
                    user_key,
                    "Daily search limit reached. Try again tomorrow.",
                )
                .await;
                return WorkOutcome::CapReached;
            }
            Err(e) => {
                tracing::error!("Rate limiter failure for {}: {}", user_key, e);
                self.notify(user_key, "Something went wrong. Please try again.")
                    .await;
                return WorkOutcome::Fault;
            }
        }

        // Step 3: debit
        let receipt = match self.ledger.debit(user_key).await {
            Ok(DebitOutcome::Charged(receipt)) => receipt,
            Ok(DebitOutcome::Insufficient) => {
                self.notify(
                    user_key,
                    "You have no credits left. Ask the administrator for a top-up.",
                )
                .await;
                return WorkOutcome::InsufficientCredit;
            }
            Err(e) => {
                tracing::error!("Ledger debit failure for {}: {}", user_key, e);
                self.notify(user_key, "Something went wrong. Please try again.")
                    .await;
                return WorkOutcome::Fault;
            }
        };

        // Step 4: fetch and classify
        let outcome = self.providers.lookup(category, &query).await;
        let provider = match &outcome {
            FetchOutcome::Fetched { provider, .. } => provider.clone(),
            FetchOutcome::Exhausted { .. } => "-".to_string(),
        };

        match classifier::classify(outcome) {
            Classification::Valid(raw) => {
                // Step 5: sanitize, format, deliver
                let clean = sanitize::scrub(category, raw);
                let report = formatter::render(category, &clean, &query);
                if let Err(e) = self.notifier.send_report(user_key, &report).await {
                    tracing::error!("Report delivery failed for {}: {}", user_key, e);
                    self.refund_quietly(receipt).await;
                    return WorkOutcome::Fault;
                }

                // Step 6: audit and settle. The report is delivered, so the
                // debit stands even if bookkeeping hiccups.
                let record = AuditRecord {
                    user_key: user_key.to_string(),
                    query,
                    category,
                    outcome: "valid".to_string(),
                    provider,
                    created_at: Utc::now(),
                };
                if let Err(e) = self.audit.append(&record).await {
                    tracing::error!("Audit append failed for {}: {}", user_key, e);
                }
                if let Err(e) = self.ledger.settle(receipt).await {
                    tracing::error!("Ledger settle failed for {}: {}", user_key, e);
                }
                tracing::info!("Work unit delivered: user={} category={}", user_key, category);
                WorkOutcome::Delivered
            }
            Classification::Empty => {
                self.refund_quietly(receipt).await;
                self.notify(
                    user_key,
                    &format!("No records found for {}. You have not been charged.", query),
                )
                .await;
                WorkOutcome::NotFound
            }
            Classification::Error(detail) => {
                tracing::warn!("Lookup failed for {}: {}", user_key, detail);
                self.refund_quietly(receipt).await;
                self.notify(
                    user_key,
                    "The search could not be completed. You have not been charged.",
                )
                .await;
                WorkOutcome::ProviderFailed
            }
        }
    }

    /// Refund that downgrades its own failure to a log line; by this point
    /// the user-facing outcome is already decided.
    async fn refund_quietly(&self, receipt: DebitReceipt) {
        if let Err(e) = self.ledger.refund(receipt).await {
            tracing::error!("Refund failed, ledger may be inconsistent: {}", e);
        }
    }

    pub async fn notify(&self, user_key: &str, text: &str) {
        if let Err(e) = self.notifier.send_text(user_key, text).await {
            tracing::warn!("Notification to {} failed: {}", user_key, e);
        }
    }

    // ===== Administrative operations =====

    /// Credit grant; false means the grant id was already applied.
    pub async fn grant(
        &self,
        target: &str,
        amount: i64,
        grant_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ledger.credit(target, amount, grant_id).await
    }

    /// Account summary for admin display (or a user's own balance).
    pub async fn balance_text(&self, target: &str) -> Result<String, AppError> {
        let record = self
            .ledger
            .snapshot(target)
            .await
            .context("Failed to load account snapshot")?;
        Ok(format!(
            "User {}\nBalance: {}\nFree lookups: {}\nSearches today: {}\nTotal searches: {}",
            record.user_key,
            record.balance,
            record.free_uses,
            record.day_count,
            record.total_lookups
        ))
    }

    /// Send a notice to every known user. Returns the delivered count.
    pub async fn broadcast(&self, text: &str) -> Result<usize, AppError> {
        let keys = self
            .store
            .list_keys()
            .await
            .context("Failed to enumerate users for broadcast")?;
        let mut delivered = 0;
        for key in &keys {
            match self.notifier.send_text(key, text).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Broadcast to {} failed: {}", key, e),
            }
        }
        tracing::info!("Broadcast delivered to {}/{} users", delivered, keys.len());
        Ok(delivered)
    }

    pub async fn user_count(&self) -> Result<i64, AppError> {
        self.store.count().await
    }
}
