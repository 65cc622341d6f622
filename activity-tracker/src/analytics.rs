use std::cmp::Ordering;

use thiserror::Error;
use tracing::warn;

use crate::hit_tracker::HitTracker;
use crate::kv::KvGateway;
use crate::models::{DailyUsageRow, TopCallerRow};
use crate::retry::RetryPolicy;
use crate::store::LogStore;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

impl From<crate::store::StoreError> for AnalyticsError {
    fn from(err: crate::store::StoreError) -> Self {
        AnalyticsError::StoreUnavailable(err.to_string())
    }
}

const DEFAULT_TTL_SECS: u64 = 3600;

/// Read-through cache over the Durable Log Store's aggregations. The
/// fingerprint (`usage:daily:<days>`, `usage:top:<hours>:<limit>`) is the
/// stable identity used by the Hit Tracker and Pre-warmer; the cache
/// version only prefixes the physical KV key, so bumping it invalidates
/// entries without breaking fingerprint parsing.
#[derive(Clone)]
pub struct AnalyticsService {
    kv: KvGateway,
    store: LogStore,
    hits: HitTracker,
    cache_version: String,
    daily_ttl_secs: u64,
    top_ttl_secs: u64,
    retry: RetryPolicy,
}

impl AnalyticsService {
    pub fn new(
        kv: KvGateway,
        store: LogStore,
        hits: HitTracker,
        cache_version: String,
        daily_ttl_secs: u64,
        top_ttl_secs: u64,
    ) -> Self {
        Self {
            kv,
            store,
            hits,
            cache_version,
            daily_ttl_secs: if daily_ttl_secs == 0 { DEFAULT_TTL_SECS } else { daily_ttl_secs },
            top_ttl_secs: if top_ttl_secs == 0 { DEFAULT_TTL_SECS } else { top_ttl_secs },
            retry: RetryPolicy::default(),
        }
    }

    fn storage_key(&self, fingerprint: &str) -> String {
        format!("{}:{fingerprint}", self.cache_version)
    }

    pub async fn daily(&self, days: i64) -> AnalyticsResult<Vec<DailyUsageRow>> {
        let fingerprint = format!("usage:daily:{days}");

        if let Some(rows) = self.read_cache(&fingerprint).await {
            return Ok(rows);
        }

        let rows = self.compute_daily(days).await?;
        self.write_cache(&fingerprint, &rows, self.daily_ttl_secs).await;
        Ok(rows)
    }

    pub async fn top(&self, hours: i64, limit: i64) -> AnalyticsResult<Vec<TopCallerRow>> {
        let fingerprint = format!("usage:top:{hours}:{limit}");

        if let Some(rows) = self.read_cache(&fingerprint).await {
            return Ok(rows);
        }

        let rows = self.retry.retry(|| self.store.top_callers(hours, limit)).await?;
        self.write_cache(&fingerprint, &rows, self.top_ttl_secs).await;
        Ok(rows)
    }

    /// Bypasses the read side and always refreshes the cache for the given
    /// fingerprint arguments.
    pub async fn prewarm_daily(&self, days: i64) -> AnalyticsResult<()> {
        let rows = self.compute_daily(days).await?;
        self.write_cache(&format!("usage:daily:{days}"), &rows, self.daily_ttl_secs).await;
        Ok(())
    }

    pub async fn prewarm_top(&self, hours: i64, limit: i64) -> AnalyticsResult<()> {
        let rows = self.retry.retry(|| self.store.top_callers(hours, limit)).await?;
        self.write_cache(&format!("usage:top:{hours}:{limit}"), &rows, self.top_ttl_secs).await;
        Ok(())
    }

    /// Iterates every active caller, collecting per-caller daily rows
    /// without cross-caller summation, sorted by `(date desc, count desc)`.
    async fn compute_daily(&self, days: i64) -> AnalyticsResult<Vec<DailyUsageRow>> {
        let caller_ids = self.retry.retry(|| self.store.list_active_caller_ids()).await?;
        let mut all_rows = Vec::new();
        for caller_id in &caller_ids {
            let rows = self.retry.retry(|| self.store.daily_usage(days, Some(caller_id.as_str()))).await?;
            all_rows.extend(rows);
        }
        all_rows.sort_by(|a, b| match b.date.cmp(&a.date) {
            Ordering::Equal => b.count.cmp(&a.count),
            other => other,
        });
        Ok(all_rows)
    }

    async fn read_cache<T: serde::de::DeserializeOwned>(&self, fingerprint: &str) -> Option<T> {
        let key = self.storage_key(fingerprint);
        match self.kv.get(&key).await {
            Ok(Some(payload)) if !payload.is_empty() => match serde_json::from_str(&payload) {
                Ok(value) => {
                    self.hits.record_hit(fingerprint).await;
                    Some(value)
                }
                Err(err) => {
                    warn!(%err, fingerprint, "failed to deserialize cached analytics payload");
                    self.hits.record_miss(fingerprint).await;
                    None
                }
            },
            Ok(_) => {
                self.hits.record_miss(fingerprint).await;
                None
            }
            Err(_) => {
                self.hits.record_miss(fingerprint).await;
                None
            }
        }
    }

    async fn write_cache<T: serde::Serialize>(&self, fingerprint: &str, rows: &[T], ttl_secs: u64) {
        if rows.is_empty() {
            return;
        }
        let key = self.storage_key(fingerprint);
        match serde_json::to_string(rows) {
            Ok(payload) => {
                if let Err(err) = self.kv.set(&key, &payload, Some(ttl_secs)).await {
                    warn!(%err, fingerprint, "failed to write analytics cache entry");
                }
            }
            Err(err) => warn!(%err, fingerprint, "failed to serialize analytics cache entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn daily_sort_orders_by_date_desc_then_count_desc() {
        let mut rows = vec![
            DailyUsageRow { date: NaiveDate::from_ymd_opt(2026, 7, 20).unwrap(), count: 3, avg_elapsed: 10.0, errors: 0 },
            DailyUsageRow { date: NaiveDate::from_ymd_opt(2026, 7, 21).unwrap(), count: 1, avg_elapsed: 5.0, errors: 0 },
            DailyUsageRow { date: NaiveDate::from_ymd_opt(2026, 7, 21).unwrap(), count: 9, avg_elapsed: 5.0, errors: 0 },
        ];
        rows.sort_by(|a, b| match b.date.cmp(&a.date) {
            Ordering::Equal => b.count.cmp(&a.count),
            other => other,
        });
        assert_eq!(rows[0].count, 9);
        assert_eq!(rows[1].count, 1);
        assert_eq!(rows[2].count, 3);
    }

    #[test]
    fn fingerprint_stays_stable_across_cache_versions() {
        // the fingerprint identity used by the hit tracker and pre-warmer
        // must not change when the cache version bumps, only the storage
        // key does.
        assert_eq!(format!("usage:daily:{}", 7), "usage:daily:7");
        assert_eq!(format!("usage:top:{}:{}", 24, 3), "usage:top:24:3");
    }
}
