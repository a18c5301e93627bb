use serde::Deserialize;

use refundgate_core::AggregateRoot;
use refundgate_infra::projections::{RefundStats, RefundView};
use refundgate_refunds::RefundRequest;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRefundRequest {
    pub order_id: String,
    /// Order line being returned; a request covers one whole line.
    pub item_id: String,
    pub reason_code: String,
    /// Decimal string; omitted means the full value of the line.
    pub refund_amount: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    /// "approve" or "deny".
    pub action: String,
    pub denial_reason: Option<String>,
    pub approved_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VendorReturnRequest {
    pub return_carrier: String,
    pub return_tracking_number: String,
}

#[derive(Debug, Deserialize)]
pub struct VendorCreditRequest {
    pub credit_amount: String,
    pub credit_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveExceptionRequest {
    /// "resume" or "cancel".
    pub resolution: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRefundsQuery {
    pub state: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

/// Response for the submit endpoint: everything the caller needs to keep
/// driving the workflow (`version` feeds the next `If-Match`).
pub fn submitted_to_json(request: &RefundRequest) -> serde_json::Value {
    serde_json::json!({
        "id": request.id_typed().to_string(),
        "refund_number": request.refund_number(),
        "state": request.state(),
        "version": request.version(),
        "refund_amount": request.refund_amount().to_string(),
    })
}

/// Response for every transition endpoint.
pub fn transition_to_json(request: &RefundRequest) -> serde_json::Value {
    serde_json::json!({
        "id": request.id_typed().to_string(),
        "state": request.state(),
        "version": request.version(),
    })
}

pub fn refund_view_to_json(view: RefundView) -> serde_json::Value {
    serde_json::json!({
        "id": view.refund_id.to_string(),
        "refund_number": view.refund_number,
        "order_id": view.order_id.to_string(),
        "order_line_ids": view.order_line_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "reason": view.reason,
        "state": view.state,
        "original_amount": view.original_amount.to_string(),
        "refund_amount": view.refund_amount.to_string(),
        "vendor_credit_amount": view.vendor_credit_amount.map(|a| a.to_string()),
        "settlement_reference": view.settlement_reference,
        "settlement_attempts": view.settlement_attempts,
        "exception_reason": view.exception_reason,
        "exception_return_state": view.exception_return_state,
        "version": view.version,
        "submitted_at": view.submitted_at.to_rfc3339(),
        "updated_at": view.updated_at.to_rfc3339(),
    })
}

pub fn stats_to_json(stats: RefundStats) -> serde_json::Value {
    serde_json::json!({
        "total_requests": stats.total_requests,
        "pending_review": stats.pending_review,
        "awaiting_vendor": stats.awaiting_vendor,
        "ready_for_settlement": stats.ready_for_settlement,
        "in_settlement": stats.in_settlement,
        "exceptions": stats.exceptions,
        "completed": stats.completed,
        "denied": stats.denied,
        "cancelled": stats.cancelled,
        "total_refunded": stats.total_refunded.to_string(),
    })
}
