use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use common_http_errors::{ApiError, Envelope};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::handlers::{apply_rate_limit_headers, check_rate_limit, rate_limited_error, resolve_caller};

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/usage/daily?days=N`: per-day, per-caller usage for the past
/// `N` days (default 7), served from the analytics cache.
pub async fn daily(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DailyQuery>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, &headers, None, None).await?;

    let decision = check_rate_limit(&state, &caller).await;
    if !decision.allowed {
        let mut response = rate_limited_error(&decision).into_response();
        apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
        return Ok(response);
    }

    let days = query.days.unwrap_or(7).clamp(1, 365);
    let rows = state
        .analytics
        .daily(days)
        .await
        .map_err(|_| ApiError::StorageUnavailable { trace_id: None })?;

    let mut response = Envelope::ok("daily usage", StatusCode::OK, rows);
    apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
    Ok(response)
}

/// `GET /api/usage/top?hours=H&limit=L`: top callers by request volume over
/// the last `H` hours (default 24), limited to `L` entries (default 3).
pub async fn top(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TopQuery>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, &headers, None, None).await?;

    let decision = check_rate_limit(&state, &caller).await;
    if !decision.allowed {
        let mut response = rate_limited_error(&decision).into_response();
        apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
        return Ok(response);
    }

    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 30);
    let limit = query.limit.unwrap_or(3).clamp(1, 100);
    let rows = state
        .analytics
        .top(hours, limit)
        .await
        .map_err(|_| ApiError::StorageUnavailable { trace_id: None })?;

    let mut response = Envelope::ok("top callers", StatusCode::OK, rows);
    apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
    Ok(response)
}
