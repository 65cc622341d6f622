use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use common_http_errors::ApiError;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::warn;

use crate::app_state::AppState;
use crate::handlers::resolve_caller;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub channel: Option<String>,
    pub days: Option<i64>,
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/usage/stream`: server-sent events over one of three channels —
/// live log events (`channel=logs`, the default), or periodically refreshed
/// daily/top analytics. Auth comes from the query string (`token` or
/// `apiKey`) since `EventSource` cannot set custom request headers.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, &HeaderMap::new(), query.token.as_deref(), query.api_key.as_deref()).await?;

    let channel = query.channel.clone().unwrap_or_else(|| "logs".to_string());

    let response = match channel.as_str() {
        "daily" => {
            let days = query.days.unwrap_or(7).clamp(1, 365);
            daily_stream(state, channel, days).into_response()
        }
        "top" => {
            let hours = query.hours.unwrap_or(24).clamp(1, 24 * 30);
            let limit = query.limit.unwrap_or(3).clamp(1, 100);
            top_stream(state, channel, hours, limit).into_response()
        }
        _ => logs_stream(state, channel, caller.caller_id).into_response(),
    };

    Ok(response)
}

fn connected_event(caller_id: &str, channel: &str) -> Event {
    Event::default().event("connected").json_data(json!({
        "caller_id": caller_id,
        "channel": channel,
        "timestamp": Utc::now(),
    })).unwrap_or_else(|_| Event::default().event("connected").data("{}"))
}

fn heartbeat_event() -> Event {
    Event::default().comment(format!("heartbeat {}", Utc::now().timestamp_millis()))
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("keepalive")
}

fn logs_stream(state: AppState, channel: String, caller_id: String) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        yield Ok(connected_event(&caller_id, &channel));

        let mut rx = state.fanout.subscribe();
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    yield Ok(heartbeat_event());
                }
                received = rx.recv() => {
                    match received {
                        Ok(event) if event.caller_id == caller_id => {
                            match Event::default().event("log:new").json_data(&event) {
                                Ok(ev) => yield Ok(ev),
                                Err(err) => warn!(%err, "failed to encode log event for stream"),
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, caller_id, "log stream subscriber lagged, dropping skipped events");
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        }
    };
    Sse::new(stream).keep_alive(keep_alive())
}

fn daily_stream(state: AppState, channel: String, days: i64) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        yield Ok(connected_event("", &channel));

        let mut push = interval(PUSH_INTERVAL);
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    yield Ok(heartbeat_event());
                }
                _ = push.tick() => {
                    match state.analytics.daily(days).await {
                        Ok(rows) => match Event::default().event("usage:daily:update").json_data(&rows) {
                            Ok(ev) => yield Ok(ev),
                            Err(err) => warn!(%err, "failed to encode daily usage for stream"),
                        },
                        Err(err) => warn!(%err, "daily usage lookup failed for stream push"),
                    }
                }
            }
        }
    };
    Sse::new(stream).keep_alive(keep_alive())
}

fn top_stream(state: AppState, channel: String, hours: i64, limit: i64) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        yield Ok(connected_event("", &channel));

        let mut push = interval(PUSH_INTERVAL);
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    yield Ok(heartbeat_event());
                }
                _ = push.tick() => {
                    match state.analytics.top(hours, limit).await {
                        Ok(rows) => match Event::default().event("usage:top:update").json_data(&rows) {
                            Ok(ev) => yield Ok(ev),
                            Err(err) => warn!(%err, "failed to encode top callers for stream"),
                        },
                        Err(err) => warn!(%err, "top callers lookup failed for stream push"),
                    }
                }
            }
        }
    };
    Sse::new(stream).keep_alive(keep_alive())
}
