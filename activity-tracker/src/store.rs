use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::models::{ActivityRecord, Caller, DailyUsageRow, TopCallerRow};

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    #[error("caller not found")]
    CallerNotFound,
    #[error("caller already exists")]
    CallerExists,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::CallerNotFound,
            sqlx::Error::Database(db) if db.constraint().is_some() => StoreError::CallerExists,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// The durable log store: caller registry and the append-only activity log,
/// backed by Postgres.
#[derive(Clone)]
pub struct LogStore {
    pool: PgPool,
}

impl LogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn insert_caller(&self, caller: &Caller) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO callers (id, caller_id, name, email, is_active, rate_limit, credential_hash, credential_encrypted, credential_lookup, created_at, last_seen_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(caller.id)
        .bind(&caller.caller_id)
        .bind(&caller.name)
        .bind(&caller.email)
        .bind(caller.is_active)
        .bind(caller.rate_limit)
        .bind(&caller.credential_hash)
        .bind(&caller.credential_encrypted)
        .bind(&caller.credential_lookup)
        .bind(caller.created_at)
        .bind(caller.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_caller_by_caller_id(&self, caller_id: &str) -> StoreResult<Option<Caller>> {
        let row = sqlx::query_as::<_, Caller>(
            "SELECT id, caller_id, name, email, is_active, rate_limit, credential_hash, credential_encrypted, credential_lookup, created_at, last_seen_at
             FROM callers WHERE caller_id = $1",
        )
        .bind(caller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_caller_by_credential_lookup(&self, lookup: &str) -> StoreResult<Option<Caller>> {
        let row = sqlx::query_as::<_, Caller>(
            "SELECT id, caller_id, name, email, is_active, rate_limit, credential_hash, credential_encrypted, credential_lookup, created_at, last_seen_at
             FROM callers WHERE credential_lookup = $1",
        )
        .bind(lookup)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_caller_by_email(&self, email: &str) -> StoreResult<Option<Caller>> {
        let row = sqlx::query_as::<_, Caller>(
            "SELECT id, caller_id, name, email, is_active, rate_limit, credential_hash, credential_encrypted, credential_lookup, created_at, last_seen_at
             FROM callers WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_active_caller_ids(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT caller_id FROM callers WHERE is_active")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get("caller_id"))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    pub async fn touch_last_seen(&self, caller_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE callers SET last_seen_at = $1 WHERE caller_id = $2")
            .bind(Utc::now())
            .bind(caller_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Appends one activity record. Bulk-flushed by the ingestion pipeline,
    /// so this executes inside a single transaction to preserve per-caller
    /// submit order.
    pub async fn bulk_insert(&self, records: &[ActivityRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO activity_records (id, caller_id, credential_id, endpoint, method, status, elapsed_ms, source_addr, user_agent, occurred_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(record.id)
            .bind(&record.caller_id)
            .bind(&record.credential_id)
            .bind(&record.endpoint)
            .bind(&record.method)
            .bind(record.status)
            .bind(record.elapsed_ms)
            .bind(&record.source_addr)
            .bind(&record.user_agent)
            .bind(record.occurred_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Daily usage aggregation for the past `days` days, preserving
    /// per-caller rows.
    pub async fn daily_usage(&self, days: i64, caller_id: Option<&str>) -> StoreResult<Vec<DailyUsageRow>> {
        let since = Utc::now() - ChronoDuration::days(days);
        let rows = if let Some(caller_id) = caller_id {
            sqlx::query(
                "SELECT occurred_at::date AS day, COUNT(*) AS count, AVG(elapsed_ms)::float8 AS avg_elapsed, COUNT(*) FILTER (WHERE status >= 400) AS errors
                 FROM activity_records WHERE occurred_at >= $1 AND caller_id = $2
                 GROUP BY day ORDER BY day DESC",
            )
            .bind(since)
            .bind(caller_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT occurred_at::date AS day, COUNT(*) AS count, AVG(elapsed_ms)::float8 AS avg_elapsed, COUNT(*) FILTER (WHERE status >= 400) AS errors
                 FROM activity_records WHERE occurred_at >= $1
                 GROUP BY day ORDER BY day DESC",
            )
            .bind(since)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| {
                Ok(DailyUsageRow {
                    date: row.try_get("day")?,
                    count: row.try_get("count")?,
                    avg_elapsed: row.try_get::<Option<f64>, _>("avg_elapsed")?.unwrap_or(0.0),
                    errors: row.try_get("errors")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    /// Top callers ranked by request count over the last `hours` hours.
    pub async fn top_callers(&self, hours: i64, limit: i64) -> StoreResult<Vec<TopCallerRow>> {
        let since = Utc::now() - ChronoDuration::hours(hours);
        let rows = sqlx::query(
            "SELECT caller_id, COUNT(*) AS count, AVG(elapsed_ms)::float8 AS avg_elapsed,
                    COUNT(*) FILTER (WHERE status >= 400) AS errors, MAX(occurred_at) AS last_access
             FROM activity_records WHERE occurred_at >= $1
             GROUP BY caller_id ORDER BY count DESC LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TopCallerRow {
                    caller_id: row.try_get("caller_id")?,
                    count: row.try_get("count")?,
                    avg_elapsed: row.try_get::<Option<f64>, _>("avg_elapsed")?.unwrap_or(0.0),
                    errors: row.try_get("errors")?,
                    last_access: row.try_get("last_access")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    /// Deletes activity records older than `retention_days`. Returns the
    /// number of rows removed.
    pub async fn delete_older_than(&self, retention_days: i64) -> StoreResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let result = sqlx::query("DELETE FROM activity_records WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Spawns the hourly retention sweep, deleting activity records older
    /// than `retention_days`. Failures are logged, never fatal.
    pub fn spawn_retention_sweep(&self, retention_days: i64) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(RETENTION_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.delete_older_than(retention_days).await {
                    Ok(deleted) if deleted > 0 => {
                        info!(deleted, retention_days, "retention sweep deleted aged activity records")
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%err, retention_days, "retention sweep failed"),
                }
            }
        });
    }
}
