use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::fanout::EventFanout;
use crate::models::ActivityRecord;
use crate::overflow::OverflowBuffer;
use crate::retry::{is_transient, RetryPolicy};
use crate::store::LogStore;

const PENDING_SAFETY_CAP: usize = 1_000;

struct Inner {
    pending: Mutex<Vec<ActivityRecord>>,
    overflow: OverflowBuffer,
    store: LogStore,
    fanout: EventFanout,
    retry: RetryPolicy,
    batch_size: usize,
    flush_lock: Mutex<()>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Accepts activity records, batches them, and flushes to the durable log
/// store, diverting into the overflow buffer when storage is transiently
/// unreachable.
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<Inner>,
}

impl IngestionPipeline {
    pub fn new(
        store: LogStore,
        fanout: EventFanout,
        batch_size: usize,
        overflow_max_size: usize,
        overflow_max_age: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Vec::new()),
                overflow: OverflowBuffer::new(overflow_max_size, overflow_max_age),
                store,
                fanout,
                retry: RetryPolicy::default(),
                batch_size,
                flush_lock: Mutex::new(()),
                shutdown_tx,
                shutdown_rx: Mutex::new(Some(shutdown_rx)),
            }),
        }
    }

    /// Enqueues `record` to the pending batch. Never blocks on storage;
    /// triggers a synchronous flush if the batch threshold is reached.
    pub async fn submit(&self, record: ActivityRecord) {
        self.inner.fanout.publish_log_event(&record);

        let should_flush = {
            let mut pending = self.inner.pending.lock().await;
            pending.push(record);
            pending.len() >= self.inner.batch_size
        };

        if should_flush {
            self.flush().await;
        }
    }

    /// Spawns the background batch-interval timer. Overlapping ticks are
    /// dropped via the flush lock's try_lock.
    pub fn spawn_timer(&self, batch_interval: Duration) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(batch_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut shutdown_rx = pipeline
                .inner
                .shutdown_rx
                .lock()
                .await
                .take()
                .expect("ingestion timer spawned more than once");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if pipeline.inner.pending.lock().await.is_empty() {
                            continue;
                        }
                        pipeline.flush().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("ingestion timer stopping");
                        return;
                    }
                }
            }
        });
    }

    /// Spawns the overflow buffer's 60-second cleanup timer.
    pub fn spawn_overflow_cleanup_timer(&self) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = pipeline.inner.overflow.cleanup().await;
                if removed > 0 {
                    info!(removed, "overflow buffer cleanup evicted stale entries");
                }
            }
        });
    }

    /// Flush algorithm: serialized by `flush_lock`. Overlapping callers
    /// skip if a flush is already in progress.
    pub async fn flush(&self) {
        let Ok(_guard) = self.inner.flush_lock.try_lock() else {
            return;
        };

        let to_write = {
            let mut pending = self.inner.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        if !self.inner.overflow.is_empty().await {
            let overflow_records = self.inner.overflow.drain(usize::MAX).await;
            let retry = self.inner.retry;
            let result = retry.retry(|| self.inner.store.bulk_insert(&overflow_records)).await;
            if let Err(err) = result {
                warn!(%err, "overflow drain failed, re-queuing");
                for record in overflow_records {
                    self.inner.overflow.add(record).await;
                }
            }
        }

        if to_write.is_empty() {
            return;
        }

        let retry = self.inner.retry;
        match retry.retry(|| self.inner.store.bulk_insert(&to_write)).await {
            Ok(()) => {}
            Err(err) => {
                let message = err.to_string();
                if is_transient(&message) {
                    warn!(%message, count = to_write.len(), "bulk insert failed transiently, diverting to overflow");
                    for record in to_write {
                        self.inner.overflow.add(record).await;
                    }
                } else {
                    let mut pending = self.inner.pending.lock().await;
                    if pending.len() + to_write.len() <= PENDING_SAFETY_CAP {
                        let mut restored = to_write;
                        restored.extend(std::mem::take(&mut *pending));
                        *pending = restored;
                    } else {
                        error!(%message, count = to_write.len(), "bulk insert failed non-transiently, dropping batch");
                    }
                }
            }
        }
    }

    pub async fn overflow_len(&self) -> usize {
        self.inner.overflow.len().await
    }

    /// Stops the interval timer, flushes pending once, then attempts one
    /// overflow flush.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(()).await;
        self.flush().await;
        if !self.inner.overflow.is_empty().await {
            let records = self.inner.overflow.drain(usize::MAX).await;
            if let Err(err) = self.inner.store.bulk_insert(&records).await {
                warn!(%err, "final overflow flush failed on shutdown");
                for record in records {
                    self.inner.overflow.add(record).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_safety_cap_is_spec_value() {
        assert_eq!(PENDING_SAFETY_CAP, 1_000);
    }
}
