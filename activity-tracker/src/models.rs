use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered caller identity. Never destroyed; deactivation only flips
/// `is_active`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Caller {
    pub id: Uuid,
    pub caller_id: String,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub rate_limit: i32,
    pub credential_hash: String,
    pub credential_encrypted: String,
    /// SHA-256 fingerprint of the plaintext API key, indexed for O(1)
    /// lookup; the bcrypt hash remains the actual verification check.
    pub credential_lookup: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// An immutable activity record as appended to the durable log store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub caller_id: String,
    pub credential_id: String,
    pub endpoint: String,
    pub method: String,
    pub status: i32,
    pub elapsed_ms: i32,
    pub source_addr: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        caller_id: String,
        credential_id: String,
        endpoint: String,
        method: String,
        status: i32,
        elapsed_ms: i32,
        source_addr: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id,
            credential_id,
            endpoint,
            method,
            status,
            elapsed_ms,
            source_addr,
            user_agent,
            occurred_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// One row of `DailyUsage`.
#[derive(Debug, Clone, Serialize)]
pub struct DailyUsageRow {
    pub date: chrono::NaiveDate,
    pub count: i64,
    pub avg_elapsed: f64,
    pub errors: i64,
}

/// One row of `TopCallers`.
#[derive(Debug, Clone, Serialize)]
pub struct TopCallerRow {
    pub caller_id: String,
    pub count: i64,
    pub avg_elapsed: f64,
    pub errors: i64,
    pub last_access: DateTime<Utc>,
}

/// The ingestion-event payload published on `api:log:new` and fanned out to
/// live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub caller_id: String,
    pub endpoint: String,
    pub method: String,
    pub status: i32,
    pub elapsed_ms: i32,
    pub timestamp: DateTime<Utc>,
}

impl From<&ActivityRecord> for LogEvent {
    fn from(record: &ActivityRecord) -> Self {
        Self {
            caller_id: record.caller_id.clone(),
            endpoint: record.endpoint.clone(),
            method: record.method.clone(),
            status: record.status,
            elapsed_ms: record.elapsed_ms,
            timestamp: record.occurred_at,
        }
    }
}
