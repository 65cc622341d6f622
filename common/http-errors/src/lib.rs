use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// The `{success, message, responseObject, statusCode}` envelope required
/// of every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(rename = "responseObject")]
    pub response_object: Option<T>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, status: StatusCode, body: T) -> Response
    where
        T: Serialize,
    {
        let envelope = Envelope {
            success: true,
            message: message.into(),
            response_object: Some(body),
            status_code: status.as_u16(),
        };
        (status, Json(envelope)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    message: String,
    #[serde(rename = "responseObject")]
    response_object: Option<()>,
    #[serde(rename = "statusCode")]
    status_code: u16,
    error: ErrorDetail,
}

/// Taxonomy from the tracker's error-handling design: validation failures,
/// auth/rate-limit rejections, storage/backing-service outages, and the
/// generic internal fallback.
#[derive(Debug)]
pub enum ApiError {
    Validation {
        field: Option<String>,
        message: String,
        trace_id: Option<Uuid>,
    },
    Unauthenticated {
        trace_id: Option<Uuid>,
    },
    Forbidden {
        message: String,
        trace_id: Option<Uuid>,
    },
    RateLimited {
        retry_after_secs: u64,
        trace_id: Option<Uuid>,
    },
    Conflict {
        message: String,
        trace_id: Option<Uuid>,
    },
    NotFound {
        message: String,
        trace_id: Option<Uuid>,
    },
    StorageUnavailable {
        trace_id: Option<Uuid>,
    },
    Internal {
        message: String,
        trace_id: Option<Uuid>,
    },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E, trace_id: Option<Uuid>) -> Self {
        Self::Internal {
            message: err.to_string(),
            trace_id,
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>, trace_id: Option<Uuid>) -> Self {
        Self::Validation {
            field: field.map(str::to_string),
            message: message.into(),
            trace_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, field, trace_id, retry_after): (
            StatusCode,
            &'static str,
            String,
            Option<String>,
            Option<Uuid>,
            Option<u64>,
        ) = match self {
            ApiError::Validation { field, message, trace_id } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, field, trace_id, None)
            }
            ApiError::Unauthenticated { trace_id } => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "authentication required".to_string(),
                None,
                trace_id,
                None,
            ),
            ApiError::Forbidden { message, trace_id } => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", message, None, trace_id, None)
            }
            ApiError::RateLimited { retry_after_secs, trace_id } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "rate limit exceeded".to_string(),
                None,
                trace_id,
                Some(retry_after_secs),
            ),
            ApiError::Conflict { message, trace_id } => {
                (StatusCode::CONFLICT, "CONFLICT", message, None, trace_id, None)
            }
            ApiError::NotFound { message, trace_id } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message, None, trace_id, None)
            }
            ApiError::StorageUnavailable { trace_id } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                "a backing store is temporarily unavailable".to_string(),
                None,
                trace_id,
                None,
            ),
            ApiError::Internal { message, trace_id } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                message,
                None,
                trace_id,
                None,
            ),
        };

        let body = ErrorEnvelope {
            success: false,
            message: message.clone(),
            response_object: None,
            status_code: status.as_u16(),
            error: ErrorDetail {
                code: code.to_string(),
                field,
                trace_id,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(code) {
            response.headers_mut().insert("X-Error-Code", value);
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
