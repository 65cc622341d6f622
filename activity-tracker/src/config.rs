use anyhow::{Context, Result};
use std::env;

/// Runtime configuration for the activity tracker, assembled once at
/// startup from the process environment.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub host: String,
    pub port: u16,

    pub database_url: String,

    pub redis_writer_url: String,
    pub redis_reader_url: Option<String>,

    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,

    pub encryption_key_hex: String,

    pub default_rate_limit: u32,
    pub rate_limit_window_secs: u64,

    pub cache_ttl_daily_secs: u64,
    pub cache_ttl_top_secs: u64,
    pub cache_version: String,

    pub batch_size: usize,
    pub batch_interval_secs: u64,
    pub overflow_max_size: usize,
    pub overflow_max_age_secs: u64,

    pub hit_tracking_enabled: bool,
    pub prewarm_on_startup: bool,
    pub prewarm_cron_enabled: bool,
    pub prewarm_hit_threshold: u64,

    pub retention_days: i64,
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let redis_writer_url = env::var("REDIS_URL").context("REDIS_URL must be set")?;
        let redis_reader_url = env::var("REDIS_REPLICA_URL").ok();

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "nexmedis-api".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "nexmedis-clients".to_string());

        let encryption_key_hex =
            env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY (64 hex chars) must be set")?;

        let default_rate_limit = env::var("DEFAULT_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1000);
        let rate_limit_window_secs = env::var("RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);

        let cache_ttl_daily_secs = env::var("CACHE_TTL_DAILY_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        let cache_ttl_top_secs = env::var("CACHE_TTL_TOP_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        let cache_version = env::var("CACHE_VERSION").unwrap_or_else(|_| "v1".to_string());

        let batch_size = env::var("INGESTION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(100);
        let batch_interval_secs = env::var("INGESTION_BATCH_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        let overflow_max_size = env::var("OVERFLOW_MAX_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(10_000);
        let overflow_max_age_secs = env::var("OVERFLOW_MAX_AGE_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);

        let hit_tracking_enabled = env::var("HIT_TRACKING_ENABLED")
            .ok()
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        let prewarm_on_startup = env::var("PREWARM_ON_STARTUP")
            .ok()
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        let prewarm_cron_enabled = env::var("PREWARM_CRON_ENABLED")
            .ok()
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        let prewarm_hit_threshold = env::var("PREWARM_HIT_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(100);

        let retention_days = env::var("RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(90);

        Ok(Self {
            host,
            port,
            database_url,
            redis_writer_url,
            redis_reader_url,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            encryption_key_hex,
            default_rate_limit,
            rate_limit_window_secs: rate_limit_window_secs.max(1),
            cache_ttl_daily_secs,
            cache_ttl_top_secs,
            cache_version,
            batch_size: batch_size.max(1),
            batch_interval_secs: batch_interval_secs.max(1),
            overflow_max_size: overflow_max_size.max(1),
            overflow_max_age_secs: overflow_max_age_secs.max(1),
            hit_tracking_enabled,
            prewarm_on_startup,
            prewarm_cron_enabled,
            prewarm_hit_threshold,
            retention_days: retention_days.max(1),
        })
    }
}
