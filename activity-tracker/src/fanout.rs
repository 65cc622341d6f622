use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::kv::KvGateway;
use crate::models::{ActivityRecord, LogEvent};

const LOG_CHANNEL: &str = "api:log:new";
const BROADCAST_CAPACITY: usize = 1024;

/// Publishes ingestion events to the KV store's pub/sub bus and
/// re-broadcasts inbound events to every connected live subscriber.
#[derive(Clone)]
pub struct EventFanout {
    kv: KvGateway,
    log_tx: broadcast::Sender<LogEvent>,
}

impl EventFanout {
    pub fn new(kv: KvGateway) -> Self {
        let (log_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { kv, log_tx }
    }

    /// Fire-and-forget publish. Errors are logged, never propagated to the
    /// ingestion caller.
    pub fn publish_log_event(&self, record: &ActivityRecord) {
        let event = LogEvent::from(record);
        let kv = self.kv.clone();
        tokio::spawn(async move {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(err) => {
                    error!(%err, "failed to serialize log event");
                    return;
                }
            };
            if let Err(err) = kv.publish(LOG_CHANNEL, &payload).await {
                warn!(%err, "failed to publish log event");
            }
        });
    }

    /// Subscribes to a new receiver of locally re-broadcast log events.
    /// Every live SSE subscriber holds one of these.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    /// Spawns the subscribe side: opens a dedicated connection via the KV
    /// Gateway and re-broadcasts every received message locally, preserving
    /// the order delivered by the pub/sub layer.
    pub fn spawn_subscriber(&self) {
        let kv = self.kv.clone();
        let log_tx = self.log_tx.clone();
        tokio::spawn(async move {
            let subscription = match kv.subscribe(LOG_CHANNEL).await {
                Ok(sub) => sub,
                Err(err) => {
                    error!(%err, "event fan-out failed to subscribe to log channel");
                    return;
                }
            };
            info!(channel = LOG_CHANNEL, "event fan-out subscribed");
            loop {
                match subscription.recv().await {
                    Some(payload) => match serde_json::from_str::<LogEvent>(&payload) {
                        Ok(event) => {
                            let _ = log_tx.send(event);
                        }
                        Err(err) => warn!(%err, "failed to deserialize log event"),
                    },
                    None => {
                        warn!("event fan-out subscription closed");
                        return;
                    }
                }
            }
        });
    }
}
