use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use refundgate_core::{Actor, Aggregate, AggregateRoot, RefundId};
use refundgate_events::Event;

use crate::request::{RefundEvent, RefundRequest};
use crate::state::RefundState;

/// One row of the audit log, reconstructed from the event stream.
///
/// The trail is derived, not stored: replaying the same events always yields
/// the same entries, so there is no second source of truth to drift.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Aggregate version after this event was applied.
    pub sequence: u64,
    /// `None` for the submission itself.
    pub from_state: Option<RefundState>,
    pub to_state: RefundState,
    /// Snake-case action name, stable for external consumers.
    pub trigger: &'static str,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
    pub detail: Option<Value>,
}

/// Fold an ordered event log into audit entries.
pub fn audit_trail(refund_id: RefundId, events: &[RefundEvent]) -> Vec<AuditEntry> {
    let mut shadow = RefundRequest::empty(refund_id);
    let mut entries = Vec::with_capacity(events.len());

    for event in events {
        let from_state = shadow.is_submitted().then(|| shadow.state());
        shadow.apply(event);
        entries.push(AuditEntry {
            sequence: shadow.version(),
            from_state,
            to_state: shadow.state(),
            trigger: event.action().name(),
            actor: event.actor().clone(),
            occurred_at: event.occurred_at(),
            detail: detail_for(event),
        });
    }

    entries
}

fn detail_for(event: &RefundEvent) -> Option<Value> {
    match event {
        RefundEvent::Submitted(e) => Some(json!({
            "order_id": e.order_id,
            "refund_number": e.refund_number,
            "reason": e.reason,
            "original_amount": e.original_amount.to_string(),
            "refund_amount": e.refund_amount.to_string(),
        })),
        RefundEvent::Approved(e) => Some(json!({
            "approved_amount": e.approved_amount.to_string(),
        })),
        RefundEvent::Denied(e) => Some(json!({
            "denial_reason": e.denial_reason,
        })),
        RefundEvent::ReturnInitiated(e) => Some(json!({
            "return_carrier": e.return_carrier,
            "return_tracking_number": e.return_tracking_number,
        })),
        RefundEvent::CreditRecorded(e) => Some(json!({
            "credit_amount": e.credit_amount.to_string(),
            "credit_reference": e.credit_reference,
        })),
        RefundEvent::SettlementStarted(e) => Some(json!({
            "attempt": e.attempt,
        })),
        RefundEvent::Issued(e) => Some(json!({
            "amount": e.amount.to_string(),
            "settlement_reference": e.settlement_reference,
        })),
        RefundEvent::SettlementFailed(e) => Some(json!({
            "attempts": e.attempts,
            "reason": e.reason,
        })),
        RefundEvent::Cancelled(e) => e.note.as_ref().map(|note| json!({ "note": note })),
        RefundEvent::Escalated(e) => Some(json!({
            "reason": e.reason,
            "return_state": e.return_state,
        })),
        RefundEvent::ExceptionResolved(e) => Some(json!({
            "resolution": e.resolution,
            "note": e.note,
        })),
        RefundEvent::ReviewStarted(_)
        | RefundEvent::ReturnInTransit(_)
        | RefundEvent::ReturnReceived(_)
        | RefundEvent::CreditRequested(_)
        | RefundEvent::Completed(_) => None,
    }
}
