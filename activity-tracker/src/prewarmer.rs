use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::analytics::AnalyticsService;
use crate::hit_tracker::HitTracker;

/// The static set of fingerprints refreshed on startup and at the tail of
/// every scheduled cycle.
const STATIC_DAILY: &[i64] = &[7, 30];
const STATIC_TOP: &[(i64, i64)] = &[(24, 3), (24, 10), (168, 10)];

const SCHEDULE_INTERVAL: Duration = Duration::from_secs(600);

enum ParsedFingerprint {
    Daily(i64),
    Top(i64, i64),
}

fn parse_fingerprint(fp: &str) -> Option<ParsedFingerprint> {
    let mut parts = fp.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("usage"), Some("daily"), Some(days), None, None) => {
            days.parse().ok().map(ParsedFingerprint::Daily)
        }
        (Some("usage"), Some("top"), Some(hours), Some(limit), None) => {
            match (hours.parse(), limit.parse()) {
                (Ok(h), Ok(l)) => Some(ParsedFingerprint::Top(h, l)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Startup and scheduled refresh of hot analytics keys.
#[derive(Clone)]
pub struct Prewarmer {
    analytics: AnalyticsService,
    hits: HitTracker,
    shutdown_tx: mpsc::Sender<()>,
}

impl Prewarmer {
    pub fn new(analytics: AnalyticsService, hits: HitTracker) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                analytics,
                hits,
                shutdown_tx: tx,
            },
            rx,
        )
    }

    async fn run_static_set(&self) {
        for days in STATIC_DAILY {
            if let Err(err) = self.analytics.prewarm_daily(*days).await {
                warn!(%err, days, "static pre-warm of daily usage failed");
            }
        }
        for (hours, limit) in STATIC_TOP {
            if let Err(err) = self.analytics.prewarm_top(*hours, *limit).await {
                warn!(%err, hours, limit, "static pre-warm of top callers failed");
            }
        }
    }

    pub async fn startup_prewarm(&self) {
        info!("running startup pre-warm");
        self.run_static_set().await;
    }

    async fn run_scheduled_cycle(&self) {
        let hot = self.hits.hot_keys().await;
        for fingerprint in hot {
            match parse_fingerprint(&fingerprint) {
                Some(ParsedFingerprint::Daily(days)) => {
                    if let Err(err) = self.analytics.prewarm_daily(days).await {
                        warn!(%err, fingerprint, "scheduled pre-warm of daily usage failed");
                    }
                }
                Some(ParsedFingerprint::Top(hours, limit)) => {
                    if let Err(err) = self.analytics.prewarm_top(hours, limit).await {
                        warn!(%err, fingerprint, "scheduled pre-warm of top callers failed");
                    }
                }
                None => {
                    warn!(fingerprint, "skipping unparseable hot fingerprint");
                }
            }
        }
        self.run_static_set().await;
    }

    /// Spawns the 10-minute scheduled pre-warm timer. Overlapping cycles
    /// are dropped via `try_lock` semantics on a guard flag.
    pub fn spawn_schedule(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let prewarmer = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SCHEDULE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let running = std::sync::Arc::new(tokio::sync::Mutex::new(()));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Ok(_guard) = running.try_lock() else {
                            continue;
                        };
                        prewarmer.run_scheduled_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("pre-warmer timer stopping");
                        return;
                    }
                }
            }
        });
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily_fingerprint() {
        match parse_fingerprint("usage:daily:7") {
            Some(ParsedFingerprint::Daily(7)) => {}
            _ => panic!("expected daily(7)"),
        }
    }

    #[test]
    fn parses_top_fingerprint() {
        match parse_fingerprint("usage:top:24:10") {
            Some(ParsedFingerprint::Top(24, 10)) => {}
            _ => panic!("expected top(24, 10)"),
        }
    }

    #[test]
    fn rejects_unknown_fingerprint_shapes() {
        assert!(parse_fingerprint("cache:threshold:usage:daily:7").is_none());
        assert!(parse_fingerprint("usage:daily:abc").is_none());
        assert!(parse_fingerprint("usage:unknown:1").is_none());
    }

    #[test]
    fn static_set_matches_spec_entries() {
        assert_eq!(STATIC_DAILY, &[7, 30]);
        assert_eq!(STATIC_TOP, &[(24, 3), (24, 10), (168, 10)]);
    }
}
