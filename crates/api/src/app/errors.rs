use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;

use refundgate_core::Money;
use refundgate_infra::executor::ExecutorError;
use refundgate_refunds::{ExceptionResolution, RefundReason, RefundState};

pub fn executor_error_to_response(err: ExecutorError) -> axum::response::Response {
    match err {
        ExecutorError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ExecutorError::InvalidTransition(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", msg)
        }
        ExecutorError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ExecutorError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "refund request not found")
        }
        ExecutorError::ExceptionState(msg) => {
            json_error(StatusCode::CONFLICT, "exception_state", msg)
        }
        ExecutorError::GatewayFailure(msg) => {
            json_error(StatusCode::BAD_GATEWAY, "gateway_failure", msg)
        }
        ExecutorError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
        }
        ExecutorError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            e.to_string(),
        ),
        ExecutorError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Pull the caller's expected aggregate version out of `If-Match`.
///
/// Accepts a bare number or an ETag-style quoted one. Every mutating
/// endpoint except submit requires it, so a missing header is a 400, not
/// a silent unfenced write.
pub fn expected_version(headers: &HeaderMap) -> Result<u64, axum::response::Response> {
    let header = headers.get(header::IF_MATCH).ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "missing If-Match header; pass the version from the last response",
        )
    })?;

    header
        .to_str()
        .ok()
        .map(|raw| raw.trim().trim_matches('"'))
        .and_then(|raw| raw.parse::<u64>().ok())
        .ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "If-Match must carry an aggregate version number",
            )
        })
}

pub fn parse_reason_code(s: &str) -> Result<RefundReason, axum::response::Response> {
    s.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "reason_code must be one of: defective, wrong_item, not_as_described, no_longer_needed, arrived_late, other",
        )
    })
}

pub fn parse_resolution(s: &str) -> Result<ExceptionResolution, axum::response::Response> {
    s.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "resolution must be one of: resume, cancel",
        )
    })
}

pub fn parse_state(s: &str) -> Result<RefundState, axum::response::Response> {
    s.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("unknown refund state '{s}'"),
        )
    })
}

/// Amounts travel as decimal strings ("24.99"); parse one or reject the call.
pub fn parse_amount(field: &str, s: &str) -> Result<Money, axum::response::Response> {
    s.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("{field} must be a non-negative decimal amount like \"24.99\""),
        )
    })
}
