//! Customer-facing notifications for refund milestones.
//!
//! Only a handful of transitions are worth a notice; the internal vendor
//! leg (return logistics, credit paperwork) stays quiet. Delivery is a
//! sink trait so the transport can be swapped without touching the
//! subscriber that feeds it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use refundgate_core::RefundId;
use refundgate_events::Event;
use refundgate_refunds::{RefundEvent, RefundState};

/// One customer-facing notice about a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundNotice {
    pub refund_id: RefundId,
    pub refund_number: String,
    pub state: RefundState,
    pub headline: String,
    pub occurred_at: DateTime<Utc>,
}

/// Delivery target for notices.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notice: &RefundNotice);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn deliver(&self, notice: &RefundNotice) {
        (**self).deliver(notice)
    }
}

/// Sink that writes notices to the log.
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn deliver(&self, notice: &RefundNotice) {
        info!(
            target: "refund_notifications",
            refund_number = %notice.refund_number,
            state = %notice.state,
            "{}", notice.headline
        );
    }
}

/// Sink that keeps notices in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    notices: Mutex<Vec<RefundNotice>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RefundNotice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(_) => Vec::new(),
        }
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn deliver(&self, notice: &RefundNotice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
    }
}

/// Build the notice for an event, if that event warrants one.
pub fn notice_for(refund_number: &str, event: &RefundEvent) -> Option<RefundNotice> {
    let (state, headline) = match event {
        RefundEvent::Approved(e) => (
            RefundState::Approved,
            format!("Refund {refund_number} approved for {}", e.approved_amount),
        ),
        RefundEvent::Denied(e) => (
            RefundState::Denied,
            format!("Refund {refund_number} denied: {}", e.denial_reason),
        ),
        RefundEvent::Issued(e) => (
            RefundState::CustomerRefundIssued,
            format!("Refund {refund_number} of {} is on its way", e.amount),
        ),
        RefundEvent::Completed(_) => (
            RefundState::Completed,
            format!("Refund {refund_number} completed"),
        ),
        RefundEvent::Escalated(e) => (
            RefundState::Exception,
            format!("Refund {refund_number} needs attention: {}", e.reason),
        ),
        RefundEvent::Cancelled(_) => (
            RefundState::Cancelled,
            format!("Refund {refund_number} cancelled"),
        ),
        _ => return None,
    };

    Some(RefundNotice {
        refund_id: event.refund_id(),
        refund_number: refund_number.to_string(),
        state,
        headline,
        occurred_at: event.occurred_at(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundgate_core::{Actor, Money};
    use refundgate_refunds::{RefundApproved, ReviewStarted, VendorCreditRequested};

    fn actor() -> Actor {
        Actor::new("ops").unwrap()
    }

    #[test]
    fn approval_produces_a_notice_with_the_amount() {
        let event = RefundEvent::Approved(RefundApproved {
            refund_id: RefundId::new(),
            approved_amount: Money::from_minor_units(2499),
            actor: actor(),
            occurred_at: Utc::now(),
        });

        let notice = notice_for("RF-1A2B3C4D5E6F", &event).unwrap();
        assert_eq!(notice.state, RefundState::Approved);
        assert!(notice.headline.contains("24.99"));
        assert!(notice.headline.contains("RF-1A2B3C4D5E6F"));
    }

    #[test]
    fn internal_transitions_stay_quiet() {
        let review = RefundEvent::ReviewStarted(ReviewStarted {
            refund_id: RefundId::new(),
            actor: actor(),
            occurred_at: Utc::now(),
        });
        let credit = RefundEvent::CreditRequested(VendorCreditRequested {
            refund_id: RefundId::new(),
            actor: actor(),
            occurred_at: Utc::now(),
        });

        assert!(notice_for("RF-X", &review).is_none());
        assert!(notice_for("RF-X", &credit).is_none());
    }

    #[test]
    fn recording_sink_keeps_delivery_order() {
        let sink = RecordingNotificationSink::new();
        for n in 1..=3u32 {
            let event = RefundEvent::Approved(RefundApproved {
                refund_id: RefundId::new(),
                approved_amount: Money::from_minor_units(u64::from(n) * 100),
                actor: actor(),
                occurred_at: Utc::now(),
            });
            if let Some(notice) = notice_for(&format!("RF-{n}"), &event) {
                sink.deliver(&notice);
            }
        }

        let notices = sink.snapshot();
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0].refund_number, "RF-1");
        assert_eq!(notices[2].refund_number, "RF-3");
    }
}
