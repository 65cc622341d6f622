use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client, Script};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Errors surfaced by the KV Gateway. Every method returns `KVUnavailable`
/// when the underlying client is not in ready state; callers treat this as
/// recoverable and fall back accordingly.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
    #[error("kv serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type KvResult<T> = Result<T, KvError>;

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Unavailable(err.to_string())
    }
}

/// Typed operations over the shared KV store. Maintains a writer connection
/// (mutations, atomic scripts, publish) and a reader connection (plain
/// reads, subscribe) that may point at a replica. When no replica is
/// configured the reader falls back to the same URL as the writer.
#[derive(Clone)]
pub struct KvGateway {
    writer: ConnectionManager,
    reader: ConnectionManager,
    pubsub_url: String,
}

const READY_DEADLINE: Duration = Duration::from_secs(10);
const RECONNECT_MAX_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_MS: u64 = 100;
const RECONNECT_CAP_MS: u64 = 3000;

impl KvGateway {
    pub async fn connect(writer_url: &str, reader_url: Option<&str>) -> KvResult<Self> {
        let writer = Self::connect_with_deadline(writer_url).await?;
        let reader_url_owned = reader_url.unwrap_or(writer_url).to_string();
        let reader = Self::connect_with_deadline(&reader_url_owned).await?;

        Ok(Self {
            writer,
            reader,
            pubsub_url: reader_url_owned,
        })
    }

    async fn connect_with_deadline(url: &str) -> KvResult<ConnectionManager> {
        let client = Client::open(url)
            .map_err(|e| KvError::Unavailable(format!("invalid kv url: {e}")))?;
        tokio::time::timeout(READY_DEADLINE, ConnectionManager::new(client))
            .await
            .map_err(|_| KvError::Unavailable("kv connect timed out after 10s".to_string()))?
            .map_err(|e| e.into())
    }

    /// Reconnects the writer connection using exponential backoff
    /// `min(100*2^(n-1), 3000) ms`, capped at 5 attempts.
    pub async fn reconnect_writer(&mut self, url: &str) -> KvResult<()> {
        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            match Self::connect_with_deadline(url).await {
                Ok(manager) => {
                    self.writer = manager;
                    info!(attempt, "kv writer reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, %err, "kv writer reconnect attempt failed");
                    let delay_ms = (RECONNECT_BASE_MS * 2u64.pow(attempt - 1)).min(RECONNECT_CAP_MS);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
        Err(KvError::Unavailable(
            "kv writer exhausted reconnect attempts".to_string(),
        ))
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.reader.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<()> {
        let mut conn = self.writer.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    pub async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.writer.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.writer.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.writer.clone();
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    pub async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut conn = self.reader.clone();
        let matched: Vec<String> = conn.keys(pattern).await?;
        Ok(matched)
    }

    /// Evaluates a Lua script atomically against the writer connection.
    /// Used by the Rate Limiter for the sliding-window decision.
    pub async fn eval_atomic(&self, script: &str, keys: &[String], args: &[String]) -> KvResult<Vec<i64>> {
        let mut conn = self.writer.clone();
        let mut invocation = Script::new(script).prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let result: Vec<i64> = invocation.invoke_async(&mut conn).await?;
        Ok(result)
    }

    pub async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        let mut conn = self.writer.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    /// Opens a dedicated pub/sub connection and subscribes to `channel`.
    /// The returned handle owns the connection; messages are read by
    /// repeatedly calling `recv` on the fan-out side.
    pub async fn subscribe(&self, channel: &str) -> KvResult<KvSubscription> {
        let client = Client::open(self.pubsub_url.as_str())
            .map_err(|e| KvError::Unavailable(format!("invalid kv url: {e}")))?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(KvSubscription {
            pubsub: Arc::new(Mutex::new(pubsub)),
        })
    }
}

/// A live subscription to a single KV pub/sub channel.
#[derive(Clone)]
pub struct KvSubscription {
    pubsub: Arc<Mutex<PubSub>>,
}

impl KvSubscription {
    /// Awaits and returns the next message payload on the subscribed
    /// channel, or `None` if the connection closed.
    pub async fn recv(&self) -> Option<String> {
        use futures_util::StreamExt;
        let mut guard = self.pubsub.lock().await;
        let mut stream = guard.on_message();
        match stream.next().await {
            Some(msg) => msg.get_payload::<String>().ok(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_matches_spec_formula() {
        let delays: Vec<u64> = (1..=RECONNECT_MAX_ATTEMPTS)
            .map(|n| (RECONNECT_BASE_MS * 2u64.pow(n - 1)).min(RECONNECT_CAP_MS))
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn kv_error_from_redis_error_is_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "boom"));
        let err: KvError = redis_err.into();
        assert!(matches!(err, KvError::Unavailable(_)));
    }
}
