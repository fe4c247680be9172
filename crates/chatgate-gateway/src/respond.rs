//! §7 error-response shaping: every non-2xx is `{"error","detail","correlation_id"}`;
//! internal detail strings never reach the client (`GatewayError::public_detail`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chatgate_core::{ErrorCode, GatewayError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorCode,
    detail: String,
    correlation_id: String,
}

pub fn error_response(e: &GatewayError) -> Response {
    let status = StatusCode::from_u16(e.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let correlation_id = uuid::Uuid::new_v4().to_string();
    tracing::warn!(code = ?e.code(), %correlation_id, "request failed");
    let body = ErrorBody {
        error: e.code(),
        detail: e.public_detail(),
        correlation_id,
    };
    (status, Json(body)).into_response()
}
