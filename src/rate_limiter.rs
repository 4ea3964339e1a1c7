use crate::errors::AppError;
use crate::store::{KeyLocks, UserStore};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Verdict for one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowDecision {
    Ok,
    /// Still inside the cooldown interval; retry after `wait_secs`.
    Cooldown { wait_secs: u64 },
    /// Day window exhausted. No finite wait is reported; the window resets
    /// once more than 24h pass since the last accepted request.
    DailyCapReached,
}

/// Per-user cooldown plus rolling daily cap.
///
/// A successful `allow` stamps `last_accepted` and bumps the day counter
/// BEFORE the lookup is attempted, so an aborted lookup still spends its
/// rate-limit slot. The day window resets when more than 24h have elapsed
/// since the last accepted request, not at a calendar boundary.
pub struct RateLimiter {
    store: Arc<dyn UserStore>,
    locks: Arc<KeyLocks>,
    cooldown: Duration,
    daily_cap: i64,
    free_allowance: i64,
}

/// Seconds left of a cooldown, rounded up so the caller never retries early.
pub fn remaining_wait(cooldown: Duration, elapsed: Duration) -> u64 {
    if elapsed >= cooldown {
        return 0;
    }
    let remaining = cooldown - elapsed;
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn UserStore>,
        locks: Arc<KeyLocks>,
        cooldown: Duration,
        daily_cap: i64,
        free_allowance: i64,
    ) -> Self {
        Self {
            store,
            locks,
            cooldown,
            daily_cap,
            free_allowance,
        }
    }

    pub async fn allow(&self, user_key: &str) -> Result<AllowDecision, AppError> {
        let lock = self.locks.for_key(user_key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_or_create(user_key, self.free_allowance)
            .await?;
        let now = Utc::now();

        if let Some(last) = record.last_accepted {
            let elapsed = now.signed_duration_since(last);

            // Window reset check runs first so a stale counter can never
            // block a returning user.
            if elapsed > ChronoDuration::hours(24) {
                record.day_count = 0;
            }

            let elapsed_std = elapsed.to_std().unwrap_or(Duration::ZERO);
            if elapsed_std < self.cooldown {
                let wait_secs = remaining_wait(self.cooldown, elapsed_std);
                tracing::debug!("Cooldown active for {} ({}s left)", user_key, wait_secs);
                return Ok(AllowDecision::Cooldown { wait_secs });
            }
        }

        if record.day_count >= self.daily_cap {
            tracing::info!(
                "Daily cap reached for {} ({}/{})",
                user_key,
                record.day_count,
                self.daily_cap
            );
            return Ok(AllowDecision::DailyCapReached);
        }

        record.last_accepted = Some(now);
        record.day_count += 1;
        self.store.upsert(&record).await?;

        Ok(AllowDecision::Ok)
    }
}
