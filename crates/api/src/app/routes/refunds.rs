use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use refundgate_core::{OrderId, OrderLineId};
use refundgate_infra::service::{SubmitItemSpec, SubmitSpec};

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub async fn submit_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::SubmitRefundRequest>,
) -> Response {
    let order_id = match body.order_id.parse::<uuid::Uuid>() {
        Ok(uuid) => OrderId::from_uuid(uuid),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };
    let line_id = match body.item_id.parse::<uuid::Uuid>() {
        Ok(uuid) => OrderLineId::from_uuid(uuid),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid item id"),
    };
    let reason = match errors::parse_reason_code(&body.reason_code) {
        Ok(reason) => reason,
        Err(response) => return response,
    };
    let requested_amount = match body.refund_amount.as_deref() {
        Some(raw) => match errors::parse_amount("refund_amount", raw) {
            Ok(amount) => Some(amount),
            Err(response) => return response,
        },
        None => None,
    };

    // A submit covers one whole order line; snapshot its quantity here.
    let Some(order) = services.refunds().orders().find_order(order_id) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("unknown order {order_id}"),
        );
    };
    let Some(line) = order.line(line_id) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("order {order_id} has no line {line_id}"),
        );
    };

    let spec = SubmitSpec {
        order_id,
        items: vec![SubmitItemSpec {
            order_line_id: line.line_id,
            quantity: line.quantity,
        }],
        reason,
        requested_amount,
        notes: body.notes,
    };

    match services.refunds().submit(actor.actor().clone(), spec).await {
        Ok(request) => (StatusCode::CREATED, Json(dto::submitted_to_json(&request))).into_response(),
        Err(err) => errors::executor_error_to_response(err),
    }
}
