use crate::errors::AppError;
use crate::models::{AuditRecord, UserRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Repository of per-user account records.
///
/// The ledger and rate limiter never touch storage directly; they go through
/// this trait so the backing engine (Postgres in production, memory in tests)
/// is swappable. Callers that read-then-write a record must hold that user's
/// key lock (see [`KeyLocks`]) for the whole cycle.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn load(&self, user_key: &str) -> Result<Option<UserRecord>, AppError>;

    /// Insert or replace a full record.
    async fn upsert(&self, record: &UserRecord) -> Result<(), AppError>;

    async fn list_keys(&self) -> Result<Vec<String>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    /// Record an administrative grant id. Returns false if the id was seen
    /// before, in which case the grant must not be applied again.
    async fn record_grant(&self, grant_id: Uuid) -> Result<bool, AppError>;

    /// Load a record, creating it lazily on first contact.
    async fn load_or_create(
        &self,
        user_key: &str,
        free_allowance: i64,
    ) -> Result<UserRecord, AppError> {
        if let Some(record) = self.load(user_key).await? {
            return Ok(record);
        }
        let record = UserRecord::new(user_key, free_allowance);
        self.upsert(&record).await?;
        tracing::info!("Created account for new user {}", user_key);
        Ok(record)
    }
}

/// Append-only audit sink. Only `valid` lookup outcomes are recorded.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), AppError>;
}

/// Per-user-key async lock registry.
///
/// A user's record must not be read-then-written from two contexts at once;
/// acquiring the key's lock for the whole cycle gives single-writer-per-key
/// without blocking unrelated users.
#[derive(Default)]
pub struct KeyLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock handle for a key, creating it on first use.
    /// Lock it with `.lock().await` and hold the guard across the
    /// read-modify-write cycle.
    pub fn for_key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("key lock registry poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// In-memory `UserStore`, used by tests and storage-free deployments.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    grants: Mutex<HashSet<Uuid>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn load(&self, user_key: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(self.users.read().await.get(user_key).cloned())
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), AppError> {
        self.users
            .write()
            .await
            .insert(record.user_key.clone(), record.clone());
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, AppError> {
        Ok(self.users.read().await.keys().cloned().collect())
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.users.read().await.len() as i64)
    }

    async fn record_grant(&self, grant_id: Uuid) -> Result<bool, AppError> {
        Ok(self.grants.lock().await.insert(grant_id))
    }
}

/// In-memory `AuditLog` with an accessor for test assertions.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        self.entries.lock().await.push(record.clone());
        Ok(())
    }
}
