use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use refundgate_core::{AggregateId, Money, OrderId, OrderLineId, RefundId};
use refundgate_events::{Event, EventEnvelope};
use refundgate_refunds::{
    ExceptionResolution, RefundEvent, RefundReason, RefundState, REFUND_AGGREGATE_TYPE,
};

use crate::read_model::ReadModelStore;

/// Query-optimized snapshot of one refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundView {
    pub refund_id: RefundId,
    pub refund_number: String,
    pub order_id: OrderId,
    pub order_line_ids: Vec<OrderLineId>,
    pub reason: RefundReason,
    pub state: RefundState,
    pub original_amount: Money,
    pub refund_amount: Money,
    pub vendor_credit_amount: Option<Money>,
    pub settlement_reference: Option<String>,
    pub settlement_attempts: u32,
    pub exception_reason: Option<String>,
    pub exception_return_state: Option<RefundState>,
    pub version: u64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workflow-wide counters derived from the current views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefundStats {
    pub total_requests: u64,
    pub pending_review: u64,
    pub awaiting_vendor: u64,
    pub ready_for_settlement: u64,
    pub in_settlement: u64,
    pub exceptions: u64,
    pub completed: u64,
    pub denied: u64,
    pub cancelled: u64,
    /// Sum of refund amounts over completed requests.
    pub total_refunded: Money,
}

#[derive(Debug, Error)]
pub enum RefundProjectionError {
    #[error("failed to deserialize refund event: {0}")]
    Deserialize(String),
    #[error("event aggregate does not match envelope: {0}")]
    AggregateMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("no view for refund {0}; its submission has not been projected")]
    MissingView(RefundId),
}

/// Builds and maintains [`RefundView`]s from the event stream.
///
/// Safe under at-least-once delivery: a per-aggregate cursor makes redelivered
/// events no-ops, and a gap in sequence numbers is reported rather than
/// silently applied out of order.
#[derive(Debug)]
pub struct RefundsProjection<S>
where
    S: ReadModelStore<RefundId, RefundView>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> RefundsProjection<S>
where
    S: ReadModelStore<RefundId, RefundView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors.get(&aggregate_id).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    fn clear_cursors(&self) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
    }

    pub fn get(&self, refund_id: &RefundId) -> Option<RefundView> {
        self.store.get(refund_id)
    }

    pub fn list(&self) -> Vec<RefundView> {
        let mut views = self.store.list();
        views.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        views
    }

    /// Find a non-terminal refund covering the given order line, if any.
    pub fn active_view_for_line(&self, order_line_id: OrderLineId) -> Option<RefundView> {
        self.store.list().into_iter().find(|view| {
            !view.state.is_terminal() && view.order_line_ids.contains(&order_line_id)
        })
    }

    pub fn stats(&self) -> RefundStats {
        let mut stats = RefundStats::default();
        for view in self.store.list() {
            stats.total_requests += 1;
            match view.state {
                RefundState::Requested | RefundState::UnderReview => stats.pending_review += 1,
                RefundState::Approved
                | RefundState::VendorReturnInitiated
                | RefundState::VendorReturnInTransit
                | RefundState::VendorReturnReceived
                | RefundState::VendorCreditPending => stats.awaiting_vendor += 1,
                RefundState::VendorCreditReceived => stats.ready_for_settlement += 1,
                RefundState::CustomerRefundProcessing | RefundState::CustomerRefundIssued => {
                    stats.in_settlement += 1
                }
                RefundState::Exception => stats.exceptions += 1,
                RefundState::Completed => {
                    stats.completed += 1;
                    stats.total_refunded = stats
                        .total_refunded
                        .checked_add(view.refund_amount)
                        .unwrap_or(stats.total_refunded);
                }
                RefundState::Denied => stats.denied += 1,
                RefundState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), RefundProjectionError> {
        if envelope.aggregate_type() != REFUND_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(aggregate_id);
        if seq == 0 {
            return Err(RefundProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Redelivery; already applied.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(RefundProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: RefundEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| RefundProjectionError::Deserialize(e.to_string()))?;

        let refund_id = event.refund_id();
        if AggregateId::from(refund_id) != aggregate_id {
            return Err(RefundProjectionError::AggregateMismatch(format!(
                "event refund_id {refund_id} does not match envelope aggregate_id {}",
                aggregate_id.as_uuid()
            )));
        }

        match &event {
            RefundEvent::Submitted(e) => {
                self.store.upsert(
                    refund_id,
                    RefundView {
                        refund_id,
                        refund_number: e.refund_number.clone(),
                        order_id: e.order_id,
                        order_line_ids: e.items.iter().map(|i| i.order_line_id).collect(),
                        reason: e.reason,
                        state: RefundState::Requested,
                        original_amount: e.original_amount,
                        refund_amount: e.refund_amount,
                        vendor_credit_amount: None,
                        settlement_reference: None,
                        settlement_attempts: 0,
                        exception_reason: None,
                        exception_return_state: None,
                        version: seq,
                        submitted_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            other => {
                let mut view = self
                    .store
                    .get(&refund_id)
                    .ok_or(RefundProjectionError::MissingView(refund_id))?;
                apply_to_view(&mut view, other);
                view.version = seq;
                view.updated_at = other.occurred_at();
                self.store.upsert(refund_id, view);
            }
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Throw away all views and rebuild from an ordered (or orderable) batch.
    pub fn rebuild(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<usize, RefundProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        self.store.clear();
        self.clear_cursors();

        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(envs.len())
    }
}

fn apply_to_view(view: &mut RefundView, event: &RefundEvent) {
    match event {
        // Creation is handled by the caller.
        RefundEvent::Submitted(_) => {}
        RefundEvent::ReviewStarted(_) => {
            view.state = RefundState::UnderReview;
        }
        RefundEvent::Approved(e) => {
            view.refund_amount = e.approved_amount;
            view.state = RefundState::Approved;
        }
        RefundEvent::Denied(_) => {
            view.state = RefundState::Denied;
        }
        RefundEvent::ReturnInitiated(_) => {
            view.state = RefundState::VendorReturnInitiated;
        }
        RefundEvent::ReturnInTransit(_) => {
            view.state = RefundState::VendorReturnInTransit;
        }
        RefundEvent::ReturnReceived(_) => {
            view.state = RefundState::VendorReturnReceived;
        }
        RefundEvent::CreditRequested(_) => {
            view.state = RefundState::VendorCreditPending;
        }
        RefundEvent::CreditRecorded(e) => {
            view.vendor_credit_amount = Some(e.credit_amount);
            view.state = RefundState::VendorCreditReceived;
        }
        RefundEvent::SettlementStarted(_) => {
            view.state = RefundState::CustomerRefundProcessing;
        }
        RefundEvent::Issued(e) => {
            view.settlement_reference = Some(e.settlement_reference.clone());
            view.state = RefundState::CustomerRefundIssued;
        }
        RefundEvent::Completed(_) => {
            view.state = RefundState::Completed;
        }
        RefundEvent::SettlementFailed(e) => {
            view.settlement_attempts = e.attempts;
            view.state = RefundState::VendorCreditReceived;
        }
        RefundEvent::Cancelled(_) => {
            view.state = RefundState::Cancelled;
        }
        RefundEvent::Escalated(e) => {
            view.exception_reason = Some(e.reason.clone());
            view.exception_return_state = Some(e.return_state);
            view.state = RefundState::Exception;
        }
        RefundEvent::ExceptionResolved(e) => {
            let return_state = view
                .exception_return_state
                .take()
                .unwrap_or(RefundState::VendorCreditReceived);
            view.state = match e.resolution {
                ExceptionResolution::Resume => return_state,
                ExceptionResolution::Cancel => RefundState::Cancelled,
            };
            view.exception_reason = None;
        }
    }
}
