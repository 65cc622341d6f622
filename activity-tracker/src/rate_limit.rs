use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::kv::KvGateway;

const SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, 0, now - window_ms)
local current = redis.call('ZCARD', key)

if current >= limit then
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local reset = now + window_ms
    if oldest[2] ~= nil then
        reset = tonumber(oldest[2]) + window_ms
    end
    return {0, current, reset}
else
    redis.call('ZADD', key, now, member)
    redis.call('EXPIRE', key, math.floor(window_ms / 1000) + 60)
    return {1, current + 1, now + window_ms}
end
"#;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub current: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Single-process sliding-window limiter used when the scripted KV
/// evaluation is unavailable. Not shared across replicas.
#[derive(Clone, Default)]
struct FallbackLimiter {
    entries: Arc<Mutex<HashMap<String, Vec<i64>>>>,
}

impl FallbackLimiter {
    async fn check(&self, caller_id: &str, limit: u32, window_secs: u64) -> RateDecision {
        let window_ms = Duration::from_secs(window_secs).as_millis() as i64;
        let now = now_millis();
        let cutoff = now - window_ms;

        let mut guard = self.entries.lock().await;
        let entries = guard.entry(caller_id.to_string()).or_default();
        entries.retain(|ts| *ts >= cutoff);

        let current = entries.len() as i64;
        if current >= limit as i64 {
            let reset_ms = entries.first().copied().unwrap_or(now) + window_ms;
            RateDecision {
                allowed: false,
                current,
                remaining: 0,
                reset_at: millis_to_datetime(reset_ms),
            }
        } else {
            entries.push(now);
            RateDecision {
                allowed: true,
                current: current + 1,
                remaining: (limit as i64 - current - 1).max(0),
                reset_at: millis_to_datetime(now + window_ms),
            }
        }
    }

    async fn sweep(&self) -> usize {
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|_, entries| !entries.is_empty());
        before - guard.len()
    }
}

/// Atomic sliding-window rate limiter keyed per caller, backed by a Lua
/// script evaluated through the KV Gateway, with an in-process fallback
/// when the script evaluation fails.
#[derive(Clone)]
pub struct RateLimiter {
    kv: KvGateway,
    window_secs: u64,
    default_ceiling: u32,
    fallback: FallbackLimiter,
}

impl RateLimiter {
    pub fn new(kv: KvGateway, window_secs: u64, default_ceiling: u32) -> Self {
        Self {
            kv,
            window_secs,
            default_ceiling,
            fallback: FallbackLimiter::default(),
        }
    }

    pub async fn check(&self, caller_id: &str, ceiling: Option<u32>) -> RateDecision {
        let limit = ceiling.unwrap_or(self.default_ceiling);
        let key = format!("rate_limit:{caller_id}");
        let now_ms = now_millis();
        let window_ms = self.window_secs as i64 * 1000;
        let member = format!("{now_ms}-{}", rand::rng().random::<u32>());

        match self
            .kv
            .eval_atomic(
                SCRIPT,
                &[key],
                &[
                    now_ms.to_string(),
                    window_ms.to_string(),
                    limit.to_string(),
                    member,
                ],
            )
            .await
        {
            Ok(result) if result.len() == 3 => {
                let allowed = result[0] == 1;
                let current = result[1];
                let reset_ms = result[2];
                RateDecision {
                    allowed,
                    current,
                    remaining: (limit as i64 - current).max(0),
                    reset_at: millis_to_datetime(reset_ms),
                }
            }
            Ok(_) => {
                warn!("rate limit script returned unexpected shape, falling back");
                self.fallback.check(caller_id, limit, self.window_secs).await
            }
            Err(err) => {
                warn!(%err, caller_id, "rate limit script evaluation failed, falling back");
                self.fallback.check(caller_id, limit, self.window_secs).await
            }
        }
    }

    /// Evicts empty entries from the in-process fallback map, every 5
    /// minutes.
    pub fn spawn_fallback_sweep(&self) {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(300));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = limiter.fallback.sweep().await;
                if removed > 0 {
                    info!(removed, "rate limiter fallback sweep evicted empty entries");
                }
            }
        });
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_allows_up_to_ceiling_then_denies() {
        let fallback = FallbackLimiter::default();

        let first = fallback.check("CL-1", 2, 3600).await;
        assert!(first.allowed);
        assert_eq!(first.current, 1);

        let second = fallback.check("CL-1", 2, 3600).await;
        assert!(second.allowed);
        assert_eq!(second.current, 2);

        let third = fallback.check("CL-1", 2, 3600).await;
        assert!(!third.allowed);
        assert_eq!(third.current, 2);
    }

    #[tokio::test]
    async fn fallback_sweep_leaves_active_callers_untouched() {
        let fallback = FallbackLimiter::default();
        let _ = fallback.check("CL-1", 5, 3600).await;
        let removed = fallback.sweep().await;
        assert_eq!(removed, 0);
    }

    #[test]
    fn script_contains_expected_redis_primitives() {
        assert!(SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(SCRIPT.contains("ZCARD"));
        assert!(SCRIPT.contains("ZADD"));
        assert!(SCRIPT.contains("EXPIRE"));
    }
}
