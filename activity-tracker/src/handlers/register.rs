use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use common_http_errors::{ApiError, Envelope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::Caller;
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub rate_limit: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub caller_id: String,
    pub name: String,
    pub email: String,
    pub api_key: String,
    pub token: String,
    pub rate_limit: i32,
    pub created_at: chrono::DateTime<Utc>,
}

/// `POST /api/register`: onboards a new caller, issuing both a recoverable
/// API key (for server-to-server logging calls) and a JWT (for the
/// dashboard/analytics surface).
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let name = body.name.trim();
    let email = body.email.trim();

    if name.is_empty() {
        return Err(ApiError::validation("name must not be empty", Some("name"), None));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::validation("email must be a valid address", Some("email"), None));
    }
    let rate_limit = body.rate_limit.unwrap_or(state.config.default_rate_limit as i32);
    if rate_limit <= 0 {
        return Err(ApiError::validation("rate_limit must be positive", Some("rate_limit"), None));
    }

    if state
        .store
        .find_caller_by_email(email)
        .await
        .map_err(|_| ApiError::StorageUnavailable { trace_id: None })?
        .is_some()
    {
        return Err(ApiError::Conflict {
            message: format!("a caller is already registered with email {email}"),
            trace_id: None,
        });
    }

    let caller_id = common_auth::generate_caller_id();
    let plain_key = common_auth::generate_api_key();
    let stored = common_auth::store_api_key(&plain_key, &state.encryption_key)
        .map_err(|err| ApiError::internal(err, None))?;
    let credential_lookup = common_crypto::sha256_hex(plain_key.as_bytes());

    let caller = Caller {
        id: Uuid::new_v4(),
        caller_id: caller_id.clone(),
        name: name.to_string(),
        email: email.to_string(),
        is_active: true,
        rate_limit,
        credential_hash: stored.hash,
        credential_encrypted: stored.encrypted,
        credential_lookup,
        created_at: Utc::now(),
        last_seen_at: None,
    };

    state.store.insert_caller(&caller).await.map_err(|err| match err {
        StoreError::CallerExists => ApiError::Conflict {
            message: format!("a caller is already registered with email {email}"),
            trace_id: None,
        },
        _ => ApiError::StorageUnavailable { trace_id: None },
    })?;

    let token = state
        .jwt
        .issue(&caller.caller_id, &caller.email, &caller.name)
        .map_err(|err| ApiError::internal(err, None))?;

    let response = RegisterResponse {
        caller_id: caller.caller_id,
        name: caller.name,
        email: caller.email,
        api_key: plain_key,
        token,
        rate_limit: caller.rate_limit,
        created_at: caller.created_at,
    };

    Ok(Envelope::ok("caller registered", StatusCode::CREATED, response))
}
