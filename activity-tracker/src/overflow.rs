use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::models::ActivityRecord;

struct Entry {
    record: ActivityRecord,
    enqueued_at: Instant,
}

/// Bounded FIFO absorbing activity records the durable log store could not
/// accept. Drains back into the ingestion pipeline once the store recovers.
pub struct OverflowBuffer {
    max_size: usize,
    max_age: std::time::Duration,
    entries: Mutex<VecDeque<Entry>>,
}

impl OverflowBuffer {
    pub fn new(max_size: usize, max_age: std::time::Duration) -> Self {
        Self {
            max_size,
            max_age,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Adds a record, dropping the oldest entry first if the buffer is at
    /// capacity.
    pub async fn add(&self, record: ActivityRecord) {
        let mut guard = self.entries.lock().await;
        if guard.len() >= self.max_size {
            if let Some(dropped) = guard.pop_front() {
                warn!(
                    caller_id = %dropped.record.caller_id,
                    "overflow buffer full, dropping oldest entry"
                );
            }
        }
        guard.push_back(Entry {
            record,
            enqueued_at: Instant::now(),
        });
    }

    /// Drains up to `limit` records, oldest first, for a flush attempt.
    /// Callers requeue via `add` on failure.
    pub async fn drain(&self, limit: usize) -> Vec<ActivityRecord> {
        let mut guard = self.entries.lock().await;
        let take = limit.min(guard.len());
        guard.drain(..take).map(|entry| entry.record).collect()
    }

    /// Evicts entries older than `max_age`, returning the number removed.
    pub async fn cleanup(&self) -> usize {
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        let max_age = self.max_age;
        guard.retain(|entry| entry.enqueued_at.elapsed() < max_age);
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(caller_id: &str) -> ActivityRecord {
        ActivityRecord::new(
            caller_id.to_string(),
            "cred-1".to_string(),
            "/usage/daily".to_string(),
            "GET".to_string(),
            200,
            12,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let buffer = OverflowBuffer::new(2, std::time::Duration::from_secs(3600));
        buffer.add(sample_record("CL-1")).await;
        buffer.add(sample_record("CL-2")).await;
        buffer.add(sample_record("CL-3")).await;

        assert_eq!(buffer.len().await, 2);
        let drained = buffer.drain(10).await;
        assert_eq!(drained[0].caller_id, "CL-2");
        assert_eq!(drained[1].caller_id, "CL-3");
    }

    #[tokio::test]
    async fn drain_respects_limit_and_order() {
        let buffer = OverflowBuffer::new(10, std::time::Duration::from_secs(3600));
        for i in 0..5 {
            buffer.add(sample_record(&format!("CL-{i}"))).await;
        }
        let first = buffer.drain(2).await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].caller_id, "CL-0");
        assert_eq!(buffer.len().await, 3);
    }

    #[tokio::test]
    async fn cleanup_evicts_stale_entries() {
        let buffer = OverflowBuffer::new(10, std::time::Duration::from_millis(1));
        buffer.add(sample_record("CL-1")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let removed = buffer.cleanup().await;
        assert_eq!(removed, 1);
        assert!(buffer.is_empty().await);
    }
}
