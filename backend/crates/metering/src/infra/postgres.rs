//! PostgreSQL Repository Implementations

use crate::domain::entities::{AlertRecord, Usage};
use crate::domain::repository::{
    AlertRepository, RequestLogRepository, UsageRepository, WindowCount,
};
use crate::domain::value_objects::RateLimitKey;
use crate::error::{MeteringError, MeteringResult};
use chrono::{DateTime, Utc};
use kernel::id::AlertId;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct PgMeteringRepository {
    pool: PgPool,
}

impl PgMeteringRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop request-log rows older than `older_than`
    ///
    /// Rows are pruned per key on every admission; this only reclaims keys
    /// that went quiet.
    pub async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> MeteringResult<u64> {
        let deleted = sqlx::query("DELETE FROM rate_limit_requests WHERE requested_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(requests = deleted, "Cleaned up expired rate limit rows");

        Ok(deleted)
    }
}

impl AlertRepository for PgMeteringRepository {
    async fn create_alert(
        &self,
        key: &str,
        external_message_id: &str,
    ) -> MeteringResult<AlertRecord> {
        let result = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO rate_limit_alerts (
                alert_id,
                alert_key,
                external_message_id,
                status
            ) VALUES ($1, $2, $3, 'active')
            RETURNING
                alert_id,
                alert_key,
                external_message_id,
                status,
                created_at,
                updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(external_message_id)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            // uq_rate_limit_alerts_active_key
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(MeteringError::DuplicateActiveAlert(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(alert_id = %row.alert_id, key = %key, "Alert stored");
        row.into_alert()
    }

    async fn is_active(&self, key: &str) -> MeteringResult<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM rate_limit_alerts
                WHERE alert_key = $1 AND status = 'active'
            )
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn resolve_active(&self, key: &str) -> MeteringResult<Option<AlertRecord>> {
        // The partial unique index guarantees at most one matching row.
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            UPDATE rate_limit_alerts
            SET status = 'resolved', updated_at = NOW()
            WHERE alert_key = $1 AND status = 'active'
            RETURNING
                alert_id,
                alert_key,
                external_message_id,
                status,
                created_at,
                updated_at
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                tracing::info!(alert_id = %r.alert_id, key = %key, "Alert resolved");
                Ok(Some(r.into_alert()?))
            }
            None => Ok(None),
        }
    }
}

impl UsageRepository for PgMeteringRepository {
    async fn record(&self, usage: &Usage) -> MeteringResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_requests (
                request_id,
                account_id,
                endpoint,
                requested_at
            ) VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(usage.id.into_uuid())
        .bind(&usage.account_id)
        .bind(&usage.endpoint)
        .bind(usage.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            request_id = %usage.id,
            account_id = %usage.account_id,
            endpoint = %usage.endpoint,
            "Usage recorded"
        );

        Ok(())
    }
}

impl RequestLogRepository for PgMeteringRepository {
    async fn count_and_insert(
        &self,
        key: &RateLimitKey,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> MeteringResult<WindowCount> {
        // Any early return drops `tx`, which rolls it back.
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent admissions for the same key until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM rate_limit_requests
            WHERE key_type = $1 AND key_value = $2 AND requested_at < $3
            "#,
        )
        .bind(key.kind().as_str())
        .bind(key.value())
        .bind(window_start)
        .execute(&mut *tx)
        .await?;

        let (count, oldest) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*), MIN(requested_at)
            FROM rate_limit_requests
            WHERE key_type = $1 AND key_value = $2 AND requested_at >= $3
            "#,
        )
        .bind(key.kind().as_str())
        .bind(key.value())
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await?;

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let inserted = count < limit;

        if inserted {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_requests (key_type, key_value, requested_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(key.kind().as_str())
            .bind(key.value())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !inserted {
            tracing::debug!(key = %key, count, limit, "Sliding window full");
        }

        Ok(WindowCount {
            count,
            inserted,
            oldest: oldest.or(inserted.then_some(now)),
        })
    }

    async fn clear(&self, key: &RateLimitKey) -> MeteringResult<()> {
        sqlx::query("DELETE FROM rate_limit_requests WHERE key_type = $1 AND key_value = $2")
            .bind(key.kind().as_str())
            .bind(key.value())
            .execute(&self.pool)
            .await?;

        tracing::info!(key = %key, "Rate limit window cleared");
        Ok(())
    }
}

// Internal row types for sqlx mapping
#[derive(sqlx::FromRow)]
struct AlertRow {
    alert_id: Uuid,
    alert_key: String,
    external_message_id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AlertRow {
    fn into_alert(self) -> MeteringResult<AlertRecord> {
        Ok(AlertRecord {
            id: AlertId::from_uuid(self.alert_id),
            key: self.alert_key,
            external_message_id: self.external_message_id,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
