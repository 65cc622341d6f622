use tracing::debug;

use crate::kv::KvGateway;

const HIT_TTL_SECS: u64 = 300;
const DEFAULT_THRESHOLD: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Per-fingerprint hit/miss telemetry backed by atomic KV counters. Every
/// operation is best-effort: failures are swallowed, never surfaced.
#[derive(Clone)]
pub struct HitTracker {
    kv: KvGateway,
    threshold: u64,
    enabled: bool,
}

impl HitTracker {
    pub fn new(kv: KvGateway, threshold: u64, enabled: bool) -> Self {
        Self {
            kv,
            threshold: if threshold == 0 { DEFAULT_THRESHOLD } else { threshold },
            enabled,
        }
    }

    pub async fn record_hit(&self, fingerprint: &str) {
        if !self.enabled {
            return;
        }
        self.bump(&hit_key(fingerprint)).await;
    }

    pub async fn record_miss(&self, fingerprint: &str) {
        if !self.enabled {
            return;
        }
        self.bump(&miss_key(fingerprint)).await;
    }

    async fn bump(&self, key: &str) {
        match self.kv.incr_by(key, 1).await {
            Ok(1) => {
                if let Err(err) = self.kv.expire(key, HIT_TTL_SECS).await {
                    debug!(%err, key, "failed to set hit counter ttl");
                }
            }
            Ok(_) => {}
            Err(err) => debug!(%err, key, "failed to bump hit counter"),
        }
    }

    pub async fn stats(&self, fingerprint: &str) -> CacheStats {
        let hits = self.read_counter(&hit_key(fingerprint)).await;
        let misses = self.read_counter(&miss_key(fingerprint)).await;
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        CacheStats { hits, misses, hit_rate }
    }

    async fn read_counter(&self, key: &str) -> u64 {
        match self.kv.get(key).await {
            Ok(Some(value)) => value.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// True when `hit_rate < 50%` and `hits + misses` exceeds the
    /// configured threshold.
    pub async fn needs_prewarming(&self, fingerprint: &str) -> bool {
        let stats = self.stats(fingerprint).await;
        let total = stats.hits + stats.misses;
        total > self.threshold && stats.hit_rate < 0.5
    }

    /// Scans hit-counter keys, derives unique fingerprints, and returns
    /// those passing `needs_prewarming`.
    pub async fn hot_keys(&self) -> Vec<String> {
        let keys = match self.kv.keys("cache:hits:*").await {
            Ok(keys) => keys,
            Err(_) => return Vec::new(),
        };

        let mut fingerprints: Vec<String> = keys
            .into_iter()
            .filter(|k| !k.ends_with(":miss"))
            .filter_map(|k| k.strip_prefix("cache:hits:").map(str::to_string))
            .collect();
        fingerprints.sort();
        fingerprints.dedup();

        let mut hot = Vec::new();
        for fp in fingerprints {
            if self.needs_prewarming(&fp).await {
                hot.push(fp);
            }
        }
        hot
    }
}

fn hit_key(fingerprint: &str) -> String {
    format!("cache:hits:{fingerprint}")
}

fn miss_key(fingerprint: &str) -> String {
    format!("cache:hits:{fingerprint}:miss")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_naming_matches_namespace() {
        assert_eq!(hit_key("usage:daily:7"), "cache:hits:usage:daily:7");
        assert_eq!(miss_key("usage:daily:7"), "cache:hits:usage:daily:7:miss");
    }

    #[test]
    fn default_threshold_applied_when_zero() {
        // threshold of 0 should fall back to the documented default, not
        // disable prewarming entirely.
        assert_eq!(DEFAULT_THRESHOLD, 100);
    }
}
