use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_http_errors::{ApiError, Envelope};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::handlers::{apply_rate_limit_headers, check_rate_limit, rate_limited_error, resolve_caller};
use crate::models::ActivityRecord;

#[derive(Debug, Deserialize)]
pub struct SubmitLogRequest {
    pub endpoint: String,
    pub method: String,
    pub status: i32,
    pub elapsed_ms: Option<i32>,
    #[serde(rename = "ip")]
    pub source_addr: Option<String>,
    #[serde(rename = "ua")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitLogResponse {
    pub accepted: bool,
}

/// `POST /api/logs`: the ingestion entry point. Authenticates by API key,
/// enforces the caller's rate ceiling, and hands the record to the
/// ingestion pipeline without waiting on the durable store.
pub async fn submit_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitLogRequest>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, &headers, None, None).await?;

    let decision = check_rate_limit(&state, &caller).await;
    if !decision.allowed {
        let mut response = rate_limited_error(&decision).into_response();
        apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
        return Ok(response);
    }

    if body.endpoint.trim().is_empty() {
        return Err(ApiError::validation("endpoint must not be empty", Some("endpoint"), None));
    }
    if body.method.trim().is_empty() {
        return Err(ApiError::validation("method must not be empty", Some("method"), None));
    }

    let user_agent = body
        .user_agent
        .or_else(|| headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string));

    let record = ActivityRecord::new(
        caller.caller_id.clone(),
        caller.id.to_string(),
        body.endpoint,
        body.method.to_uppercase(),
        body.status,
        body.elapsed_ms.unwrap_or(0),
        body.source_addr,
        user_agent,
    );

    state.ingestion.submit(record).await;
    state.metrics.record_submit("accepted");

    let mut response = Envelope::ok("log accepted", StatusCode::CREATED, SubmitLogResponse { accepted: true });
    apply_rate_limit_headers(&mut response, &decision, caller.rate_limit as u32, state.config.rate_limit_window_secs);
    Ok(response)
}
