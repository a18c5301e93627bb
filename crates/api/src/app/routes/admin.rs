//! Operator-facing refund endpoints.
//!
//! Every mutating route requires an `If-Match` header carrying the version
//! from the caller's last read or write, so concurrent operators cannot
//! silently stomp each other's transitions.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use refundgate_core::RefundId;
use refundgate_refunds::{
    ApproveRefund, CancelRefund, DenyRefund, InitiateVendorReturn, MarkReturnInTransit,
    MarkReturnReceived, RecordVendorCredit, RefundCommand, RequestVendorCredit, ResolveException,
    StartReview,
};

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/refunds", get(list_refunds))
        .route("/refunds/stats", get(refund_stats))
        .route("/refunds/:id", get(get_refund))
        .route("/refunds/:id/events", get(refund_events))
        .route("/refunds/:id/review", post(review_refund))
        .route("/refunds/:id/start-review", post(start_review))
        .route("/refunds/:id/vendor-return", post(initiate_vendor_return))
        .route("/refunds/:id/vendor-return/in-transit", post(mark_return_in_transit))
        .route("/refunds/:id/vendor-return/received", post(mark_return_received))
        .route("/refunds/:id/request-credit", post(request_credit))
        .route("/refunds/:id/vendor-credit", put(record_vendor_credit))
        .route("/refunds/:id/process-refund", post(process_refund))
        .route("/refunds/:id/cancel", post(cancel_refund))
        .route("/refunds/:id/resolve-exception", post(resolve_exception))
}

fn parse_refund_id(id: &str) -> Result<RefundId, Response> {
    id.parse::<uuid::Uuid>()
        .map(RefundId::from_uuid)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid refund id"))
}

async fn transition_response(
    services: &AppServices,
    refund_id: RefundId,
    command: RefundCommand,
    expected_version: u64,
) -> Response {
    match services
        .refunds()
        .execute(refund_id, command, Some(expected_version))
        .await
    {
        Ok(request) => (StatusCode::OK, Json(dto::transition_to_json(&request))).into_response(),
        Err(err) => errors::executor_error_to_response(err),
    }
}

async fn review_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::ReviewRequest>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = match body.action.trim().to_ascii_lowercase().as_str() {
        "approve" => {
            let approved_amount = match body.approved_amount.as_deref() {
                Some(raw) => match errors::parse_amount("approved_amount", raw) {
                    Ok(amount) => Some(amount),
                    Err(response) => return response,
                },
                None => None,
            };
            RefundCommand::Approve(ApproveRefund {
                refund_id,
                actor: actor.actor().clone(),
                approved_amount,
                occurred_at: Utc::now(),
            })
        }
        "deny" => RefundCommand::Deny(DenyRefund {
            refund_id,
            actor: actor.actor().clone(),
            denial_reason: body.denial_reason.unwrap_or_default(),
            occurred_at: Utc::now(),
        }),
        other => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("unknown review action '{other}'"),
            )
        }
    };
    transition_response(&services, refund_id, command, expected).await
}

async fn start_review(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::StartReview(StartReview {
        refund_id,
        actor: actor.actor().clone(),
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn initiate_vendor_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::VendorReturnRequest>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::InitiateReturn(InitiateVendorReturn {
        refund_id,
        actor: actor.actor().clone(),
        return_carrier: body.return_carrier,
        return_tracking_number: body.return_tracking_number,
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn mark_return_in_transit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::MarkReturnInTransit(MarkReturnInTransit {
        refund_id,
        actor: actor.actor().clone(),
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn mark_return_received(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::MarkReturnReceived(MarkReturnReceived {
        refund_id,
        actor: actor.actor().clone(),
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn request_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::RequestCredit(RequestVendorCredit {
        refund_id,
        actor: actor.actor().clone(),
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn record_vendor_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::VendorCreditRequest>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let credit_amount = match errors::parse_amount("credit_amount", &body.credit_amount) {
        Ok(amount) => amount,
        Err(response) => return response,
    };
    let command = RefundCommand::RecordCredit(RecordVendorCredit {
        refund_id,
        actor: actor.actor().clone(),
        credit_amount,
        credit_reference: body.credit_reference,
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn process_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    match services
        .refunds()
        .process_refund(refund_id, actor.actor().clone(), Some(expected))
        .await
    {
        Ok(request) => (StatusCode::OK, Json(dto::transition_to_json(&request))).into_response(),
        Err(err) => errors::executor_error_to_response(err),
    }
}

async fn cancel_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<dto::CancelRequest>>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let command = RefundCommand::Cancel(CancelRefund {
        refund_id,
        actor: actor.actor().clone(),
        note: body.and_then(|Json(body)| body.note),
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn resolve_exception(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::ResolveExceptionRequest>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let expected = match errors::expected_version(&headers) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let resolution = match errors::parse_resolution(&body.resolution) {
        Ok(resolution) => resolution,
        Err(response) => return response,
    };
    let command = RefundCommand::ResolveException(ResolveException {
        refund_id,
        actor: actor.actor().clone(),
        resolution,
        note: body.note,
        occurred_at: Utc::now(),
    });
    transition_response(&services, refund_id, command, expected).await
}

async fn list_refunds(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListRefundsQuery>,
) -> Response {
    let state_filter = match query.state.as_deref() {
        Some(raw) => match errors::parse_state(raw) {
            Ok(state) => Some(state),
            Err(response) => return response,
        },
        None => None,
    };
    let items: Vec<_> = services
        .refunds()
        .list()
        .into_iter()
        .filter(|view| state_filter.map_or(true, |state| view.state == state))
        .map(dto::refund_view_to_json)
        .collect();
    Json(serde_json::json!({ "items": items })).into_response()
}

async fn get_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match services.refunds().view(refund_id) {
        Some(view) => Json(dto::refund_view_to_json(view)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "refund request not found"),
    }
}

async fn refund_events(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let refund_id = match parse_refund_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match services.refunds().audit(refund_id).await {
        Ok(entries) => Json(serde_json::json!({ "items": entries })).into_response(),
        Err(err) => errors::executor_error_to_response(err),
    }
}

async fn refund_stats(Extension(services): Extension<Arc<AppServices>>) -> Response {
    Json(dto::stats_to_json(services.refunds().stats())).into_response()
}
