use crate::errors::AppError;
use crate::models::UserRecord;
use crate::store::{KeyLocks, UserStore};
use std::sync::Arc;
use uuid::Uuid;

/// Which pool a debit was taken from. A refund must restore the same pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargedPool {
    FreeUse,
    Balance,
}

/// Proof of a single successful debit.
///
/// The receipt is consumed by exactly one of [`CreditLedger::settle`] or
/// [`CreditLedger::refund`]; move semantics make a double refund or a
/// refund-after-settle unrepresentable.
#[derive(Debug)]
#[must_use = "a debit must end in settle() or refund()"]
pub struct DebitReceipt {
    user_key: String,
    pool: ChargedPool,
    amount: i64,
}

impl DebitReceipt {
    pub fn pool(&self) -> ChargedPool {
        self.pool
    }
}

#[derive(Debug)]
pub enum DebitOutcome {
    Charged(DebitReceipt),
    /// Free-use pool empty and balance below cost. No external call may be
    /// made for this request.
    Insufficient,
}

/// Owns every user's credit pools and serializes same-user updates.
///
/// Storage lives behind [`UserStore`]; the ledger adds the per-key lock
/// discipline so two in-flight requests from one user cannot interleave a
/// read-modify-write. Different users never contend.
pub struct CreditLedger {
    store: Arc<dyn UserStore>,
    locks: Arc<KeyLocks>,
    cost: i64,
    free_allowance: i64,
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn UserStore>,
        locks: Arc<KeyLocks>,
        cost: i64,
        free_allowance: i64,
    ) -> Self {
        Self {
            store,
            locks,
            cost,
            free_allowance,
        }
    }

    /// Charge one lookup. The free-use pool is consumed before balance.
    pub async fn debit(&self, user_key: &str) -> Result<DebitOutcome, AppError> {
        let lock = self.locks.for_key(user_key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_or_create(user_key, self.free_allowance)
            .await?;

        if record.free_uses > 0 {
            record.free_uses -= 1;
            self.store.upsert(&record).await?;
            tracing::debug!(
                "Debited free use from {} ({} remaining)",
                user_key,
                record.free_uses
            );
            return Ok(DebitOutcome::Charged(DebitReceipt {
                user_key: user_key.to_string(),
                pool: ChargedPool::FreeUse,
                amount: 1,
            }));
        }

        if record.balance >= self.cost {
            record.balance -= self.cost;
            self.store.upsert(&record).await?;
            tracing::debug!(
                "Debited {} credit(s) from {} (balance now {})",
                self.cost,
                user_key,
                record.balance
            );
            return Ok(DebitOutcome::Charged(DebitReceipt {
                user_key: user_key.to_string(),
                pool: ChargedPool::Balance,
                amount: self.cost,
            }));
        }

        tracing::info!(
            "Insufficient credit for {} (balance {}, cost {})",
            user_key,
            record.balance,
            self.cost
        );
        Ok(DebitOutcome::Insufficient)
    }

    /// Reverse the debit recorded in the receipt, restoring the exact pool
    /// that was charged.
    pub async fn refund(&self, receipt: DebitReceipt) -> Result<(), AppError> {
        let lock = self.locks.for_key(&receipt.user_key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_or_create(&receipt.user_key, self.free_allowance)
            .await?;

        match receipt.pool {
            ChargedPool::FreeUse => record.free_uses += receipt.amount,
            ChargedPool::Balance => record.balance += receipt.amount,
        }
        self.store.upsert(&record).await?;

        tracing::info!(
            "Refunded {} unit(s) to {} ({:?} pool)",
            receipt.amount,
            receipt.user_key,
            receipt.pool
        );
        Ok(())
    }

    /// Success path: the debit stands, and the account's lifetime lookup
    /// counter advances.
    pub async fn settle(&self, receipt: DebitReceipt) -> Result<(), AppError> {
        let lock = self.locks.for_key(&receipt.user_key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_or_create(&receipt.user_key, self.free_allowance)
            .await?;
        record.total_lookups += 1;
        self.store.upsert(&record).await?;

        Ok(())
    }

    /// Administrative top-up. Returns false (and applies nothing) when the
    /// grant id was already seen, so transport retries cannot double-credit.
    pub async fn credit(
        &self,
        user_key: &str,
        amount: i64,
        grant_id: Uuid,
    ) -> Result<bool, AppError> {
        if amount <= 0 {
            return Err(AppError::BadRequest(
                "Credit amount must be positive".to_string(),
            ));
        }

        if !self.store.record_grant(grant_id).await? {
            tracing::warn!(
                "Ignoring duplicate credit grant {} for {}",
                grant_id,
                user_key
            );
            return Ok(false);
        }

        let lock = self.locks.for_key(user_key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_or_create(user_key, self.free_allowance)
            .await?;
        record.balance += amount;
        self.store.upsert(&record).await?;

        tracing::info!(
            "Credited {} to {} (balance now {}, grant {})",
            amount,
            user_key,
            record.balance,
            grant_id
        );
        Ok(true)
    }

    pub async fn balance(&self, user_key: &str) -> Result<i64, AppError> {
        Ok(self.snapshot(user_key).await?.balance)
    }

    /// Full account snapshot for admin display.
    pub async fn snapshot(&self, user_key: &str) -> Result<UserRecord, AppError> {
        self.store
            .load_or_create(user_key, self.free_allowance)
            .await
    }
}
