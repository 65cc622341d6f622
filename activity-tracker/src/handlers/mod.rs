pub mod health;
pub mod logs;
pub mod register;
pub mod stream;
pub mod usage;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use common_crypto::sha256_hex;
use common_http_errors::ApiError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::models::Caller;
use crate::rate_limit::RateDecision;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(register::register))
        .route("/api/logs", post(logs::submit_log))
        .route("/api/usage/daily", get(usage::daily))
        .route("/api/usage/top", get(usage::top))
        .route("/api/usage/stream", get(stream::stream))
        .route("/api/health", get(health::health))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn metrics_endpoint(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%err, "failed to render metrics");
            Response::builder()
                .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics error response")
        }
    }
}

/// Resolves the calling identity from either a `Bearer` JWT or an
/// `X-API-Key` header. Query-string equivalents (`token`, `apiKey`) are
/// accepted for the SSE endpoint, which cannot set custom headers.
pub async fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
    query_api_key: Option<&str>,
) -> Result<Caller, ApiError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let token = parse_bearer(value)?;
        return resolve_from_jwt(state, &token).await;
    }
    if let Some(value) = headers.get("X-API-Key") {
        let key = value.to_str().map_err(|_| unauthenticated())?.trim();
        return resolve_from_api_key(state, key).await;
    }
    if let Some(token) = query_token {
        return resolve_from_jwt(state, token).await;
    }
    if let Some(key) = query_api_key {
        return resolve_from_api_key(state, key).await;
    }
    Err(unauthenticated())
}

async fn resolve_from_jwt(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    let claims = state.jwt.verify(token).map_err(|_| unauthenticated())?;
    let caller = state
        .store
        .find_caller_by_caller_id(&claims.caller_id)
        .await
        .map_err(|_| ApiError::StorageUnavailable { trace_id: None })?
        .ok_or_else(unauthenticated)?;
    ensure_active(caller)
}

async fn resolve_from_api_key(state: &AppState, key: &str) -> Result<Caller, ApiError> {
    let lookup = sha256_hex(key.as_bytes());
    let caller = state
        .store
        .find_caller_by_credential_lookup(&lookup)
        .await
        .map_err(|_| ApiError::StorageUnavailable { trace_id: None })?
        .ok_or_else(unauthenticated)?;

    let matches = common_auth::compare_api_key(key, &caller.credential_hash).map_err(|_| unauthenticated())?;
    if !matches {
        return Err(unauthenticated());
    }
    ensure_active(caller)
}

fn ensure_active(caller: Caller) -> Result<Caller, ApiError> {
    if !caller.is_active {
        return Err(ApiError::Forbidden {
            message: "caller has been deactivated".to_string(),
            trace_id: None,
        });
    }
    Ok(caller)
}

fn unauthenticated() -> ApiError {
    ApiError::Unauthenticated { trace_id: None }
}

fn parse_bearer(value: &HeaderValue) -> Result<String, ApiError> {
    let raw = value.to_str().map_err(|_| unauthenticated())?.trim();
    let token = raw.strip_prefix("Bearer ").ok_or_else(unauthenticated)?.trim();
    if token.is_empty() {
        return Err(unauthenticated());
    }
    Ok(token.to_string())
}

/// Checks the rate limit for `caller`, recording the outcome in metrics.
/// Returns the decision on success (allowed or not) — callers apply
/// [`apply_rate_limit_headers`] to their response and turn a denial into a
/// 429 themselves, since the response to stamp differs per handler.
pub async fn check_rate_limit(state: &AppState, caller: &Caller) -> RateDecision {
    let decision = state.rate_limiter.check(&caller.caller_id, Some(caller.rate_limit as u32)).await;
    state.metrics.record_rate_check(decision.allowed);
    decision
}

pub fn rate_limited_error(decision: &RateDecision) -> ApiError {
    let retry_after = (decision.reset_at - chrono::Utc::now()).num_seconds().max(0) as u64;
    ApiError::RateLimited { retry_after_secs: retry_after, trace_id: None }
}

pub fn apply_rate_limit_headers(response: &mut Response, decision: &RateDecision, limit: u32, window_secs: u64) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_at.to_rfc3339()) {
        headers.insert("X-RateLimit-Reset", v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{window_secs}s")) {
        headers.insert("X-RateLimit-Window", v);
    }
}
