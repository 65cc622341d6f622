use std::sync::Arc;

use axum::extract::FromRef;
use common_auth::JwtCodec;
use common_crypto::EncryptionKey;
use sqlx::PgPool;

use crate::analytics::AnalyticsService;
use crate::config::TrackerConfig;
use crate::fanout::EventFanout;
use crate::hit_tracker::HitTracker;
use crate::ingestion::IngestionPipeline;
use crate::kv::KvGateway;
use crate::metrics::TrackerMetrics;
use crate::prewarmer::Prewarmer;
use crate::rate_limit::RateLimiter;
use crate::store::LogStore;

/// Process-wide dependency container. Every long-lived singleton named in
/// the component design is constructed once at startup and handed out
/// through this struct, rather than reached for as an ambient global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrackerConfig>,
    pub jwt: Arc<JwtCodec>,
    pub encryption_key: Arc<EncryptionKey>,
    pub store: LogStore,
    pub kv: KvGateway,
    pub rate_limiter: RateLimiter,
    pub analytics: AnalyticsService,
    pub hits: HitTracker,
    pub ingestion: IngestionPipeline,
    pub fanout: EventFanout,
    pub prewarmer: Prewarmer,
    pub metrics: Arc<TrackerMetrics>,
}

impl FromRef<AppState> for Arc<JwtCodec> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl AppState {
    pub async fn bootstrap(config: TrackerConfig) -> anyhow::Result<(Self, tokio::sync::mpsc::Receiver<()>)> {
        let config = Arc::new(config);

        let pool = PgPool::connect(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        let store = LogStore::new(pool);
        store.spawn_retention_sweep(config.retention_days);

        let kv = KvGateway::connect(&config.redis_writer_url, config.redis_reader_url.as_deref()).await?;

        let jwt_config = common_auth::JwtConfig::new(
            config.jwt_secret.clone(),
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
        );
        let jwt = Arc::new(JwtCodec::new(jwt_config));

        let encryption_key = Arc::new(EncryptionKey::from_hex(&config.encryption_key_hex)?);

        let fanout = EventFanout::new(kv.clone());
        fanout.spawn_subscriber();

        let hits = HitTracker::new(kv.clone(), config.prewarm_hit_threshold, config.hit_tracking_enabled);

        let analytics = AnalyticsService::new(
            kv.clone(),
            store.clone(),
            hits.clone(),
            config.cache_version.clone(),
            config.cache_ttl_daily_secs,
            config.cache_ttl_top_secs,
        );

        let rate_limiter = RateLimiter::new(kv.clone(), config.rate_limit_window_secs, config.default_rate_limit);
        rate_limiter.spawn_fallback_sweep();

        let ingestion = IngestionPipeline::new(
            store.clone(),
            fanout.clone(),
            config.batch_size,
            config.overflow_max_size,
            std::time::Duration::from_secs(config.overflow_max_age_secs),
        );
        ingestion.spawn_timer(std::time::Duration::from_secs(config.batch_interval_secs));
        ingestion.spawn_overflow_cleanup_timer();

        let (prewarmer, prewarmer_shutdown_rx) = Prewarmer::new(analytics.clone(), hits.clone());
        if config.prewarm_on_startup {
            prewarmer.startup_prewarm().await;
        }

        let metrics = Arc::new(TrackerMetrics::new()?);

        let state = Self {
            config,
            jwt,
            encryption_key,
            store,
            kv,
            rate_limiter,
            analytics,
            hits,
            ingestion,
            fanout,
            prewarmer,
            metrics,
        };

        Ok((state, prewarmer_shutdown_rx))
    }
}
