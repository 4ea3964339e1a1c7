use crate::errors::AppError;
use crate::models::{AuditRecord, UserRecord};
use crate::store::{AuditLog, UserStore};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Creates the user/audit tables if they do not exist yet.
///
/// Sequential statements instead of one script for better sqlx compatibility.
/// No migration machinery: the layout is append-only and stable.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_accounts (
            user_key TEXT PRIMARY KEY,
            balance BIGINT NOT NULL DEFAULT 0,
            free_uses BIGINT NOT NULL DEFAULT 0,
            last_accepted TIMESTAMPTZ,
            day_count BIGINT NOT NULL DEFAULT 0,
            referred_by TEXT,
            joined_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            total_lookups BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id BIGSERIAL PRIMARY KEY,
            user_key TEXT NOT NULL,
            query TEXT NOT NULL,
            category TEXT NOT NULL,
            outcome TEXT NOT NULL,
            provider TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit_grants (
            grant_id UUID PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database schema verified");
    Ok(())
}

/// Postgres-backed `UserStore`.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn load(&self, user_key: &str) -> Result<Option<UserRecord>, AppError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT user_key, balance, free_uses, last_accepted, day_count,
                   referred_by, joined_at, total_lookups
            FROM user_accounts
            WHERE user_key = $1
            "#,
        )
        .bind(user_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_accounts
                (user_key, balance, free_uses, last_accepted, day_count,
                 referred_by, joined_at, total_lookups)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_key) DO UPDATE SET
                balance = EXCLUDED.balance,
                free_uses = EXCLUDED.free_uses,
                last_accepted = EXCLUDED.last_accepted,
                day_count = EXCLUDED.day_count,
                total_lookups = EXCLUDED.total_lookups
            "#,
        )
        .bind(&record.user_key)
        .bind(record.balance)
        .bind(record.free_uses)
        .bind(record.last_accepted)
        .bind(record.day_count)
        .bind(&record.referred_by)
        .bind(record.joined_at)
        .bind(record.total_lookups)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, AppError> {
        let keys = sqlx::query_scalar::<_, String>("SELECT user_key FROM user_accounts")
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    async fn count(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn record_grant(&self, grant_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO credit_grants (grant_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(grant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Postgres-backed append-only audit log.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (user_key, query, category, outcome, provider, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.user_key)
        .bind(&record.query)
        .bind(record.category.as_str())
        .bind(&record.outcome)
        .bind(&record.provider)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Audit entry stored for user {} ({})",
            record.user_key,
            record.category
        );
        Ok(())
    }
}
