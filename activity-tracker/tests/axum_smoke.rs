use std::env;

use activity_tracker::app_state::AppState;
use activity_tracker::config::TrackerConfig;
use activity_tracker::handlers;
use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn test_config() -> Result<TrackerConfig> {
    Ok(TrackerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: env::var("ACTIVITY_TRACKER_TEST_DATABASE_URL")
            .map_err(|_| anyhow!("ACTIVITY_TRACKER_TEST_DATABASE_URL must be set"))?,
        redis_writer_url: env::var("ACTIVITY_TRACKER_TEST_REDIS_URL")
            .map_err(|_| anyhow!("ACTIVITY_TRACKER_TEST_REDIS_URL must be set"))?,
        redis_reader_url: None,
        jwt_secret: "smoke-test-secret".to_string(),
        jwt_issuer: "nexmedis-api".to_string(),
        jwt_audience: "nexmedis-clients".to_string(),
        encryption_key_hex: "11".repeat(32),
        default_rate_limit: 1000,
        rate_limit_window_secs: 3600,
        cache_ttl_daily_secs: 60,
        cache_ttl_top_secs: 60,
        cache_version: "smoke".to_string(),
        batch_size: 10,
        batch_interval_secs: 1,
        overflow_max_size: 100,
        overflow_max_age_secs: 3600,
        hit_tracking_enabled: true,
        prewarm_on_startup: false,
        prewarm_cron_enabled: false,
        prewarm_hit_threshold: 100,
        retention_days: 90,
    })
}

/// Exercises registration, log submission, and the daily/top/health
/// endpoints end to end against real Postgres and Redis instances. Skipped
/// automatically when the test databases are not configured.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires live Postgres and Redis instances"]
async fn smoke_tests_core_routes() -> Result<()> {
    let config = test_config()?;
    let (state, _prewarmer_shutdown_rx) = AppState::bootstrap(config).await?;
    let app = handlers::router(state);

    let health_response = app
        .clone()
        .oneshot(Request::builder().uri("/api/health").body(Body::empty())?)
        .await?;
    assert_eq!(health_response.status(), StatusCode::OK);

    let email = format!("smoke-{}@example.com", uuid::Uuid::new_v4());
    let register_body = json!({ "name": "Smoke Tester", "email": email, "rate_limit": 50 });
    let register_request = Request::builder()
        .method("POST")
        .uri("/api/register")
        .header("content-type", "application/json")
        .body(Body::from(register_body.to_string()))?;
    let register_response = app.clone().oneshot(register_request).await?;
    assert_eq!(register_response.status(), StatusCode::CREATED);
    let register_bytes = register_response.into_body().collect().await?.to_bytes();
    let register_json: Value = serde_json::from_slice(&register_bytes)?;
    assert!(register_json["success"].as_bool().unwrap_or(false));
    let api_key = register_json["responseObject"]["api_key"]
        .as_str()
        .ok_or_else(|| anyhow!("missing api_key in register response"))?
        .to_string();

    let duplicate_request = Request::builder()
        .method("POST")
        .uri("/api/register")
        .header("content-type", "application/json")
        .body(Body::from(register_body.to_string()))?;
    let duplicate_response = app.clone().oneshot(duplicate_request).await?;
    assert_eq!(duplicate_response.status(), StatusCode::CONFLICT);

    let log_body = json!({
        "endpoint": "/orders",
        "method": "get",
        "status": 200,
        "elapsed_ms": 42,
    });
    let log_request = Request::builder()
        .method("POST")
        .uri("/api/logs")
        .header("content-type", "application/json")
        .header("X-API-Key", api_key.as_str())
        .body(Body::from(log_body.to_string()))?;
    let log_response = app.clone().oneshot(log_request).await?;
    assert_eq!(log_response.status(), StatusCode::CREATED);
    assert!(log_response.headers().contains_key("X-RateLimit-Remaining"));

    let unauthenticated_log = Request::builder()
        .method("POST")
        .uri("/api/logs")
        .header("content-type", "application/json")
        .body(Body::from(log_body.to_string()))?;
    let unauthenticated_response = app.clone().oneshot(unauthenticated_log).await?;
    assert_eq!(unauthenticated_response.status(), StatusCode::UNAUTHORIZED);

    let daily_request = Request::builder()
        .uri("/api/usage/daily?days=7")
        .header("X-API-Key", api_key.as_str())
        .body(Body::empty())?;
    let daily_response = app.clone().oneshot(daily_request).await?;
    assert_eq!(daily_response.status(), StatusCode::OK);

    let top_request = Request::builder()
        .uri("/api/usage/top?hours=24&limit=3")
        .header("X-API-Key", api_key.as_str())
        .body(Body::empty())?;
    let top_response = app.clone().oneshot(top_request).await?;
    assert_eq!(top_response.status(), StatusCode::OK);

    let metrics_response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty())?)
        .await?;
    assert_eq!(metrics_response.status(), StatusCode::OK);
    let metrics_bytes = metrics_response.into_body().collect().await?.to_bytes();
    let metrics_text = std::str::from_utf8(&metrics_bytes)?;
    assert!(metrics_text.contains("tracker_ingestion_submits_total"));

    Ok(())
}
