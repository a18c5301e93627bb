use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refundgate_core::{
    Actor, Aggregate, AggregateRoot, DomainError, DomainResult, Money, OrderId, OrderLineId,
    RefundId,
};
use refundgate_events::Event;

use crate::guards;
use crate::state::RefundState;
use crate::state_table::{self, RefundAction};

/// Stream/aggregate type identifier used by the event store and projections.
pub const REFUND_AGGREGATE_TYPE: &str = "refunds.request";

/// Derive the human-facing refund number from the request id.
///
/// UUIDv7 ids are time-ordered, so the derived numbers sort roughly by
/// submission time. Assigned once at submit and never reassigned.
pub fn refund_number_for(refund_id: RefundId) -> String {
    let hex = refund_id.as_uuid().simple().to_string();
    format!("RF-{}", hex[..12].to_ascii_uppercase())
}

/// Customer-supplied reason, fixed at submit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    Defective,
    WrongItem,
    NotAsDescribed,
    NoLongerNeeded,
    ArrivedLate,
    Other,
}

impl RefundReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RefundReason::Defective => "defective",
            RefundReason::WrongItem => "wrong_item",
            RefundReason::NotAsDescribed => "not_as_described",
            RefundReason::NoLongerNeeded => "no_longer_needed",
            RefundReason::ArrivedLate => "arrived_late",
            RefundReason::Other => "other",
        }
    }
}

impl core::fmt::Display for RefundReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RefundReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defective" => Ok(RefundReason::Defective),
            "wrong_item" => Ok(RefundReason::WrongItem),
            "not_as_described" => Ok(RefundReason::NotAsDescribed),
            "no_longer_needed" => Ok(RefundReason::NoLongerNeeded),
            "arrived_late" => Ok(RefundReason::ArrivedLate),
            "other" => Ok(RefundReason::Other),
            _ => Err(DomainError::validation(format!("unknown reason code '{s}'"))),
        }
    }
}

/// Immutable snapshot of an order line taken at submit time.
///
/// Captured so later catalog price edits cannot retroactively change what a
/// refund is worth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundItem {
    pub order_line_id: OrderLineId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Operator decision when leaving the exception state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionResolution {
    /// Return to the state captured when the request was escalated.
    Resume,
    /// Give up on the refund entirely.
    Cancel,
}

impl core::str::FromStr for ExceptionResolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resume" => Ok(ExceptionResolution::Resume),
            "cancel" => Ok(ExceptionResolution::Cancel),
            _ => Err(DomainError::validation(format!("unknown resolution '{s}'"))),
        }
    }
}

/// Aggregate root: one customer refund request and its vendor-gated lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    id: RefundId,
    refund_number: String,
    order_id: Option<OrderId>,
    reason: Option<RefundReason>,
    items: Vec<RefundItem>,
    notes: Option<String>,
    original_amount: Money,
    refund_amount: Money,
    vendor_credit_amount: Option<Money>,
    credit_reference: Option<String>,
    denial_reason: Option<String>,
    return_carrier: Option<String>,
    return_tracking_number: Option<String>,
    settlement_reference: Option<String>,
    settlement_attempts: u32,
    exception_reason: Option<String>,
    exception_return_state: Option<RefundState>,
    state: RefundState,
    version: u64,
    submitted: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl RefundRequest {
    /// Create an empty, not-yet-submitted aggregate instance for rehydration.
    pub fn empty(id: RefundId) -> Self {
        Self {
            id,
            refund_number: String::new(),
            order_id: None,
            reason: None,
            items: Vec::new(),
            notes: None,
            original_amount: Money::ZERO,
            refund_amount: Money::ZERO,
            vendor_credit_amount: None,
            credit_reference: None,
            denial_reason: None,
            return_carrier: None,
            return_tracking_number: None,
            settlement_reference: None,
            settlement_attempts: 0,
            exception_reason: None,
            exception_return_state: None,
            state: RefundState::Requested,
            version: 0,
            submitted: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Rehydrate from an ordered event log.
    pub fn replay(id: RefundId, events: &[RefundEvent]) -> Self {
        let mut request = Self::empty(id);
        for event in events {
            request.apply(event);
        }
        request
    }

    pub fn id_typed(&self) -> RefundId {
        self.id
    }

    pub fn refund_number(&self) -> &str {
        &self.refund_number
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn reason(&self) -> Option<RefundReason> {
        self.reason
    }

    pub fn items(&self) -> &[RefundItem] {
        &self.items
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn original_amount(&self) -> Money {
        self.original_amount
    }

    pub fn refund_amount(&self) -> Money {
        self.refund_amount
    }

    pub fn vendor_credit_amount(&self) -> Option<Money> {
        self.vendor_credit_amount
    }

    pub fn credit_reference(&self) -> Option<&str> {
        self.credit_reference.as_deref()
    }

    pub fn denial_reason(&self) -> Option<&str> {
        self.denial_reason.as_deref()
    }

    pub fn return_carrier(&self) -> Option<&str> {
        self.return_carrier.as_deref()
    }

    pub fn return_tracking_number(&self) -> Option<&str> {
        self.return_tracking_number.as_deref()
    }

    pub fn settlement_reference(&self) -> Option<&str> {
        self.settlement_reference.as_deref()
    }

    pub fn settlement_attempts(&self) -> u32 {
        self.settlement_attempts
    }

    pub fn exception_reason(&self) -> Option<&str> {
        self.exception_reason.as_deref()
    }

    pub fn exception_return_state(&self) -> Option<RefundState> {
        self.exception_return_state
    }

    pub fn state(&self) -> RefundState {
        self.state
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for RefundRequest {
    type Id = RefundId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitRefund (creates the aggregate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRefund {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub refund_number: String,
    pub reason: RefundReason,
    pub items: Vec<RefundItem>,
    /// Defaults to the original amount when absent.
    pub requested_amount: Option<Money>,
    pub notes: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartReview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReview {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRefund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRefund {
    pub refund_id: RefundId,
    /// Reviewers may reduce the amount; `None` keeps the requested amount.
    pub approved_amount: Option<Money>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DenyRefund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRefund {
    pub refund_id: RefundId,
    pub denial_reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: InitiateVendorReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateVendorReturn {
    pub refund_id: RefundId,
    pub return_carrier: String,
    pub return_tracking_number: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReturnInTransit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReturnInTransit {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReturnReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReturnReceived {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestVendorCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVendorCredit {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordVendorCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVendorCredit {
    pub refund_id: RefundId,
    pub credit_amount: Money,
    pub credit_reference: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginSettlement (first leg of `process_refund`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSettlement {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmSettlement (gateway call succeeded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSettlement {
    pub refund_id: RefundId,
    pub settlement_reference: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailSettlement (gateway call failed after adapter retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailSettlement {
    pub refund_id: RefundId,
    pub reason: String,
    /// Escalate to the exception state once this many attempts have failed.
    pub max_attempts: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelRefund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRefund {
    pub refund_id: RefundId,
    pub note: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FlagException (operator escalation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagException {
    pub refund_id: RefundId,
    pub reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResolveException (operator-only exit from the exception state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveException {
    pub refund_id: RefundId,
    pub resolution: ExceptionResolution,
    pub note: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundCommand {
    Submit(SubmitRefund),
    StartReview(StartReview),
    Approve(ApproveRefund),
    Deny(DenyRefund),
    InitiateReturn(InitiateVendorReturn),
    MarkReturnInTransit(MarkReturnInTransit),
    MarkReturnReceived(MarkReturnReceived),
    RequestCredit(RequestVendorCredit),
    RecordCredit(RecordVendorCredit),
    BeginSettlement(BeginSettlement),
    ConfirmSettlement(ConfirmSettlement),
    FailSettlement(FailSettlement),
    Cancel(CancelRefund),
    FlagException(FlagException),
    ResolveException(ResolveException),
}

/// Event: RefundSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundSubmitted {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub refund_number: String,
    pub reason: RefundReason,
    pub items: Vec<RefundItem>,
    pub original_amount: Money,
    pub refund_amount: Money,
    pub notes: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReviewStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStarted {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundApproved {
    pub refund_id: RefundId,
    /// The effective refund amount after the review.
    pub approved_amount: Money,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundDenied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDenied {
    pub refund_id: RefundId,
    pub denial_reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorReturnInitiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReturnInitiated {
    pub refund_id: RefundId,
    pub return_carrier: String,
    pub return_tracking_number: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorReturnInTransit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReturnInTransit {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorReturnReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReturnReceived {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorCreditRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCreditRequested {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorCreditRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCreditRecorded {
    pub refund_id: RefundId,
    pub credit_amount: Money,
    pub credit_reference: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStarted {
    pub refund_id: RefundId,
    /// 1-based attempt counter, including this one.
    pub attempt: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerRefundIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRefundIssued {
    pub refund_id: RefundId,
    pub amount: Money,
    pub settlement_reference: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub refund_id: RefundId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailed {
    pub refund_id: RefundId,
    /// Total failed attempts so far, including this one.
    pub attempts: u32,
    pub reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCancelled {
    pub refund_id: RefundId,
    pub note: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundEscalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEscalated {
    pub refund_id: RefundId,
    pub reason: String,
    /// Where a `resume` resolution will return to.
    pub return_state: RefundState,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundExceptionResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundExceptionResolved {
    pub refund_id: RefundId,
    pub resolution: ExceptionResolution,
    pub note: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundEvent {
    Submitted(RefundSubmitted),
    ReviewStarted(ReviewStarted),
    Approved(RefundApproved),
    Denied(RefundDenied),
    ReturnInitiated(VendorReturnInitiated),
    ReturnInTransit(VendorReturnInTransit),
    ReturnReceived(VendorReturnReceived),
    CreditRequested(VendorCreditRequested),
    CreditRecorded(VendorCreditRecorded),
    SettlementStarted(SettlementStarted),
    Issued(CustomerRefundIssued),
    Completed(RefundCompleted),
    SettlementFailed(SettlementFailed),
    Cancelled(RefundCancelled),
    Escalated(RefundEscalated),
    ExceptionResolved(RefundExceptionResolved),
}

impl RefundEvent {
    pub fn refund_id(&self) -> RefundId {
        match self {
            RefundEvent::Submitted(e) => e.refund_id,
            RefundEvent::ReviewStarted(e) => e.refund_id,
            RefundEvent::Approved(e) => e.refund_id,
            RefundEvent::Denied(e) => e.refund_id,
            RefundEvent::ReturnInitiated(e) => e.refund_id,
            RefundEvent::ReturnInTransit(e) => e.refund_id,
            RefundEvent::ReturnReceived(e) => e.refund_id,
            RefundEvent::CreditRequested(e) => e.refund_id,
            RefundEvent::CreditRecorded(e) => e.refund_id,
            RefundEvent::SettlementStarted(e) => e.refund_id,
            RefundEvent::Issued(e) => e.refund_id,
            RefundEvent::Completed(e) => e.refund_id,
            RefundEvent::SettlementFailed(e) => e.refund_id,
            RefundEvent::Cancelled(e) => e.refund_id,
            RefundEvent::Escalated(e) => e.refund_id,
            RefundEvent::ExceptionResolved(e) => e.refund_id,
        }
    }

    pub fn actor(&self) -> &Actor {
        match self {
            RefundEvent::Submitted(e) => &e.actor,
            RefundEvent::ReviewStarted(e) => &e.actor,
            RefundEvent::Approved(e) => &e.actor,
            RefundEvent::Denied(e) => &e.actor,
            RefundEvent::ReturnInitiated(e) => &e.actor,
            RefundEvent::ReturnInTransit(e) => &e.actor,
            RefundEvent::ReturnReceived(e) => &e.actor,
            RefundEvent::CreditRequested(e) => &e.actor,
            RefundEvent::CreditRecorded(e) => &e.actor,
            RefundEvent::SettlementStarted(e) => &e.actor,
            RefundEvent::Issued(e) => &e.actor,
            RefundEvent::Completed(e) => &e.actor,
            RefundEvent::SettlementFailed(e) => &e.actor,
            RefundEvent::Cancelled(e) => &e.actor,
            RefundEvent::Escalated(e) => &e.actor,
            RefundEvent::ExceptionResolved(e) => &e.actor,
        }
    }

    /// The workflow action this event records.
    ///
    /// Compound operations attribute each of their events to the action that
    /// produced them; escalations always read as `flag_exception`, whichever
    /// handler raised them.
    pub fn action(&self) -> RefundAction {
        match self {
            RefundEvent::Submitted(_) => RefundAction::Submit,
            RefundEvent::ReviewStarted(_) => RefundAction::StartReview,
            RefundEvent::Approved(_) => RefundAction::Approve,
            RefundEvent::Denied(_) => RefundAction::Deny,
            RefundEvent::ReturnInitiated(_) => RefundAction::InitiateReturn,
            RefundEvent::ReturnInTransit(_) => RefundAction::MarkReturnInTransit,
            RefundEvent::ReturnReceived(_) => RefundAction::MarkReturnReceived,
            RefundEvent::CreditRequested(_) => RefundAction::RequestCredit,
            RefundEvent::CreditRecorded(_) => RefundAction::RecordCredit,
            RefundEvent::SettlementStarted(_) => RefundAction::BeginSettlement,
            RefundEvent::Issued(_) => RefundAction::ConfirmSettlement,
            RefundEvent::Completed(_) => RefundAction::ConfirmSettlement,
            RefundEvent::SettlementFailed(_) => RefundAction::FailSettlement,
            RefundEvent::Cancelled(_) => RefundAction::Cancel,
            RefundEvent::Escalated(_) => RefundAction::FlagException,
            RefundEvent::ExceptionResolved(_) => RefundAction::ResolveException,
        }
    }
}

impl Event for RefundEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RefundEvent::Submitted(_) => "refunds.request.submitted",
            RefundEvent::ReviewStarted(_) => "refunds.request.review_started",
            RefundEvent::Approved(_) => "refunds.request.approved",
            RefundEvent::Denied(_) => "refunds.request.denied",
            RefundEvent::ReturnInitiated(_) => "refunds.request.return_initiated",
            RefundEvent::ReturnInTransit(_) => "refunds.request.return_in_transit",
            RefundEvent::ReturnReceived(_) => "refunds.request.return_received",
            RefundEvent::CreditRequested(_) => "refunds.request.credit_requested",
            RefundEvent::CreditRecorded(_) => "refunds.request.credit_recorded",
            RefundEvent::SettlementStarted(_) => "refunds.request.settlement_started",
            RefundEvent::Issued(_) => "refunds.request.issued",
            RefundEvent::Completed(_) => "refunds.request.completed",
            RefundEvent::SettlementFailed(_) => "refunds.request.settlement_failed",
            RefundEvent::Cancelled(_) => "refunds.request.cancelled",
            RefundEvent::Escalated(_) => "refunds.request.escalated",
            RefundEvent::ExceptionResolved(_) => "refunds.request.exception_resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RefundEvent::Submitted(e) => e.occurred_at,
            RefundEvent::ReviewStarted(e) => e.occurred_at,
            RefundEvent::Approved(e) => e.occurred_at,
            RefundEvent::Denied(e) => e.occurred_at,
            RefundEvent::ReturnInitiated(e) => e.occurred_at,
            RefundEvent::ReturnInTransit(e) => e.occurred_at,
            RefundEvent::ReturnReceived(e) => e.occurred_at,
            RefundEvent::CreditRequested(e) => e.occurred_at,
            RefundEvent::CreditRecorded(e) => e.occurred_at,
            RefundEvent::SettlementStarted(e) => e.occurred_at,
            RefundEvent::Issued(e) => e.occurred_at,
            RefundEvent::Completed(e) => e.occurred_at,
            RefundEvent::SettlementFailed(e) => e.occurred_at,
            RefundEvent::Cancelled(e) => e.occurred_at,
            RefundEvent::Escalated(e) => e.occurred_at,
            RefundEvent::ExceptionResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for RefundRequest {
    type Command = RefundCommand;
    type Event = RefundEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RefundEvent::Submitted(e) => {
                self.id = e.refund_id;
                self.refund_number = e.refund_number.clone();
                self.order_id = Some(e.order_id);
                self.reason = Some(e.reason);
                self.items = e.items.clone();
                self.notes = e.notes.clone();
                self.original_amount = e.original_amount;
                self.refund_amount = e.refund_amount;
                self.state = RefundState::Requested;
                self.submitted = true;
                self.created_at = Some(e.occurred_at);
            }
            RefundEvent::ReviewStarted(_) => {
                self.state = RefundState::UnderReview;
            }
            RefundEvent::Approved(e) => {
                self.refund_amount = e.approved_amount;
                self.state = RefundState::Approved;
            }
            RefundEvent::Denied(e) => {
                self.denial_reason = Some(e.denial_reason.clone());
                self.state = RefundState::Denied;
            }
            RefundEvent::ReturnInitiated(e) => {
                self.return_carrier = Some(e.return_carrier.clone());
                self.return_tracking_number = Some(e.return_tracking_number.clone());
                self.state = RefundState::VendorReturnInitiated;
            }
            RefundEvent::ReturnInTransit(_) => {
                self.state = RefundState::VendorReturnInTransit;
            }
            RefundEvent::ReturnReceived(_) => {
                self.state = RefundState::VendorReturnReceived;
            }
            RefundEvent::CreditRequested(_) => {
                self.state = RefundState::VendorCreditPending;
            }
            RefundEvent::CreditRecorded(e) => {
                self.vendor_credit_amount = Some(e.credit_amount);
                self.credit_reference = Some(e.credit_reference.clone());
                self.state = RefundState::VendorCreditReceived;
            }
            RefundEvent::SettlementStarted(_) => {
                self.state = RefundState::CustomerRefundProcessing;
            }
            RefundEvent::Issued(e) => {
                self.settlement_reference = Some(e.settlement_reference.clone());
                self.state = RefundState::CustomerRefundIssued;
            }
            RefundEvent::Completed(_) => {
                self.state = RefundState::Completed;
            }
            RefundEvent::SettlementFailed(e) => {
                self.settlement_attempts = e.attempts;
                self.state = RefundState::VendorCreditReceived;
            }
            RefundEvent::Cancelled(_) => {
                self.state = RefundState::Cancelled;
            }
            RefundEvent::Escalated(e) => {
                self.exception_reason = Some(e.reason.clone());
                self.exception_return_state = Some(e.return_state);
                self.state = RefundState::Exception;
            }
            RefundEvent::ExceptionResolved(e) => {
                // Escalation always captures the return state first; the
                // fallback is the most conservative resume point.
                let return_state = self
                    .exception_return_state
                    .take()
                    .unwrap_or(RefundState::VendorCreditReceived);
                self.state = match e.resolution {
                    ExceptionResolution::Resume => return_state,
                    ExceptionResolution::Cancel => RefundState::Cancelled,
                };
                self.exception_reason = None;
            }
        }

        self.updated_at = Some(event.occurred_at());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RefundCommand::Submit(cmd) => self.handle_submit(cmd),
            RefundCommand::StartReview(cmd) => self.handle_start_review(cmd),
            RefundCommand::Approve(cmd) => self.handle_approve(cmd),
            RefundCommand::Deny(cmd) => self.handle_deny(cmd),
            RefundCommand::InitiateReturn(cmd) => self.handle_initiate_return(cmd),
            RefundCommand::MarkReturnInTransit(cmd) => self.handle_mark_in_transit(cmd),
            RefundCommand::MarkReturnReceived(cmd) => self.handle_mark_received(cmd),
            RefundCommand::RequestCredit(cmd) => self.handle_request_credit(cmd),
            RefundCommand::RecordCredit(cmd) => self.handle_record_credit(cmd),
            RefundCommand::BeginSettlement(cmd) => self.handle_begin_settlement(cmd),
            RefundCommand::ConfirmSettlement(cmd) => self.handle_confirm_settlement(cmd),
            RefundCommand::FailSettlement(cmd) => self.handle_fail_settlement(cmd),
            RefundCommand::Cancel(cmd) => self.handle_cancel(cmd),
            RefundCommand::FlagException(cmd) => self.handle_flag_exception(cmd),
            RefundCommand::ResolveException(cmd) => self.handle_resolve_exception(cmd),
        }
    }
}

impl RefundRequest {
    fn ensure_submitted(&self) -> DomainResult<()> {
        if !self.submitted {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_refund_id(&self, refund_id: RefundId) -> DomainResult<()> {
        if self.id != refund_id {
            return Err(DomainError::validation("refund_id mismatch"));
        }
        Ok(())
    }

    /// Single gating point: every transition is either in the state table or
    /// rejected here.
    fn ensure_actionable(&self, action: RefundAction) -> DomainResult<()> {
        if self.state == RefundState::Exception && action != RefundAction::ResolveException {
            return Err(DomainError::exception_state(format!(
                "refund {} requires operator resolution before '{action}'",
                self.refund_number
            )));
        }
        if !state_table::allows(self.state, action) {
            return Err(DomainError::invalid_transition(format!(
                "'{action}' is not allowed from {}",
                self.state
            )));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitRefund) -> DomainResult<Vec<RefundEvent>> {
        if self.submitted {
            return Err(DomainError::conflict("refund request already exists"));
        }
        self.ensure_refund_id(cmd.refund_id)?;
        guards::non_empty("refund number", &cmd.refund_number)?;
        guards::items_present(&cmd.items)?;

        let original_amount = cmd
            .items
            .iter()
            .try_fold(Money::ZERO, |total, item| {
                item.unit_price
                    .checked_mul(item.quantity)
                    .and_then(|line_total| total.checked_add(line_total))
            })
            .ok_or_else(|| DomainError::validation("item amounts overflow"))?;

        let refund_amount = cmd.requested_amount.unwrap_or(original_amount);
        guards::amount_positive("refund amount", refund_amount)?;
        guards::amount_within(refund_amount, original_amount)?;

        Ok(vec![RefundEvent::Submitted(RefundSubmitted {
            refund_id: cmd.refund_id,
            order_id: cmd.order_id,
            refund_number: cmd.refund_number.clone(),
            reason: cmd.reason,
            items: cmd.items.clone(),
            original_amount,
            refund_amount,
            notes: cmd.notes.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_review(&self, cmd: &StartReview) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::StartReview)?;

        Ok(vec![RefundEvent::ReviewStarted(ReviewStarted {
            refund_id: cmd.refund_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveRefund) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::Approve)?;

        let approved_amount = cmd.approved_amount.unwrap_or(self.refund_amount);
        guards::approved_amount_within(approved_amount, self.refund_amount)?;

        Ok(vec![RefundEvent::Approved(RefundApproved {
            refund_id: cmd.refund_id,
            approved_amount,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deny(&self, cmd: &DenyRefund) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::Deny)?;
        guards::non_empty("denial reason", &cmd.denial_reason)?;

        Ok(vec![RefundEvent::Denied(RefundDenied {
            refund_id: cmd.refund_id,
            denial_reason: cmd.denial_reason.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_initiate_return(&self, cmd: &InitiateVendorReturn) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::InitiateReturn)?;
        guards::non_empty("return carrier", &cmd.return_carrier)?;
        guards::non_empty("return tracking number", &cmd.return_tracking_number)?;

        Ok(vec![RefundEvent::ReturnInitiated(VendorReturnInitiated {
            refund_id: cmd.refund_id,
            return_carrier: cmd.return_carrier.clone(),
            return_tracking_number: cmd.return_tracking_number.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_in_transit(&self, cmd: &MarkReturnInTransit) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::MarkReturnInTransit)?;

        Ok(vec![RefundEvent::ReturnInTransit(VendorReturnInTransit {
            refund_id: cmd.refund_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_received(&self, cmd: &MarkReturnReceived) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::MarkReturnReceived)?;

        Ok(vec![RefundEvent::ReturnReceived(VendorReturnReceived {
            refund_id: cmd.refund_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_credit(&self, cmd: &RequestVendorCredit) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::RequestCredit)?;

        Ok(vec![RefundEvent::CreditRequested(VendorCreditRequested {
            refund_id: cmd.refund_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_credit(&self, cmd: &RecordVendorCredit) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::RecordCredit)?;
        guards::amount_positive("credit amount", cmd.credit_amount)?;
        guards::non_empty("credit reference", &cmd.credit_reference)?;

        let mut events = vec![RefundEvent::CreditRecorded(VendorCreditRecorded {
            refund_id: cmd.refund_id,
            credit_amount: cmd.credit_amount,
            credit_reference: cmd.credit_reference.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })];

        // Under-credit never silently refunds the full requested amount: park
        // the request for an operator, who may resume (accept the shortfall)
        // or cancel.
        if cmd.credit_amount < self.refund_amount {
            events.push(RefundEvent::Escalated(RefundEscalated {
                refund_id: cmd.refund_id,
                reason: format!(
                    "vendor credit {} is below the requested refund {}",
                    cmd.credit_amount, self.refund_amount
                ),
                return_state: RefundState::VendorCreditReceived,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_begin_settlement(&self, cmd: &BeginSettlement) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::BeginSettlement)?;

        Ok(vec![RefundEvent::SettlementStarted(SettlementStarted {
            refund_id: cmd.refund_id,
            attempt: self.settlement_attempts + 1,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_settlement(&self, cmd: &ConfirmSettlement) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::ConfirmSettlement)?;
        guards::non_empty("settlement reference", &cmd.settlement_reference)?;

        Ok(vec![
            RefundEvent::Issued(CustomerRefundIssued {
                refund_id: cmd.refund_id,
                amount: self.refund_amount,
                settlement_reference: cmd.settlement_reference.clone(),
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            }),
            RefundEvent::Completed(RefundCompleted {
                refund_id: cmd.refund_id,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_fail_settlement(&self, cmd: &FailSettlement) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::FailSettlement)?;

        let attempts = self.settlement_attempts + 1;
        let mut events = vec![RefundEvent::SettlementFailed(SettlementFailed {
            refund_id: cmd.refund_id,
            attempts,
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if attempts >= cmd.max_attempts.max(1) {
            events.push(RefundEvent::Escalated(RefundEscalated {
                refund_id: cmd.refund_id,
                reason: format!(
                    "settlement failed after {attempts} attempt(s): {}",
                    cmd.reason
                ),
                return_state: RefundState::VendorCreditReceived,
                actor: cmd.actor.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelRefund) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::Cancel)?;

        Ok(vec![RefundEvent::Cancelled(RefundCancelled {
            refund_id: cmd.refund_id,
            note: cmd.note.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_flag_exception(&self, cmd: &FlagException) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::FlagException)?;
        guards::non_empty("escalation reason", &cmd.reason)?;

        Ok(vec![RefundEvent::Escalated(RefundEscalated {
            refund_id: cmd.refund_id,
            reason: cmd.reason.clone(),
            return_state: self.state,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve_exception(&self, cmd: &ResolveException) -> DomainResult<Vec<RefundEvent>> {
        self.ensure_submitted()?;
        self.ensure_refund_id(cmd.refund_id)?;
        self.ensure_actionable(RefundAction::ResolveException)?;

        Ok(vec![RefundEvent::ExceptionResolved(RefundExceptionResolved {
            refund_id: cmd.refund_id,
            resolution: cmd.resolution,
            note: cmd.note.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_table::EDGES;

    fn operator() -> Actor {
        Actor::new("ops.taylor").unwrap()
    }

    fn customer() -> Actor {
        Actor::new("customer-4471").unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_item(unit_minor: u64, quantity: u32) -> RefundItem {
        RefundItem {
            order_line_id: OrderLineId::new(),
            product_name: "Holographic Binder".to_string(),
            quantity,
            unit_price: Money::from_minor_units(unit_minor),
        }
    }

    fn submit_cmd(refund_id: RefundId, requested: Option<Money>) -> SubmitRefund {
        SubmitRefund {
            refund_id,
            order_id: OrderId::new(),
            refund_number: refund_number_for(refund_id),
            reason: RefundReason::Defective,
            items: vec![test_item(2499, 1)],
            requested_amount: requested,
            notes: None,
            actor: customer(),
            occurred_at: test_time(),
        }
    }

    fn submitted_request() -> RefundRequest {
        let refund_id = RefundId::new();
        let mut request = RefundRequest::empty(refund_id);
        let events = request
            .handle(&RefundCommand::Submit(submit_cmd(refund_id, None)))
            .unwrap();
        for event in &events {
            request.apply(event);
        }
        request
    }

    /// Handle each command in order, applying every emitted event.
    fn advance(request: &mut RefundRequest, commands: Vec<RefundCommand>) -> Vec<RefundEvent> {
        let mut log = Vec::new();
        for command in commands {
            let events = request.handle(&command).unwrap();
            for event in &events {
                request.apply(event);
            }
            log.extend(events);
        }
        log
    }

    fn to_credit_received(request: &mut RefundRequest) -> Vec<RefundEvent> {
        let id = request.id_typed();
        advance(
            request,
            vec![
                RefundCommand::Approve(ApproveRefund {
                    refund_id: id,
                    approved_amount: None,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::InitiateReturn(InitiateVendorReturn {
                    refund_id: id,
                    return_carrier: "UPS".to_string(),
                    return_tracking_number: "1Z999".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::RecordCredit(RecordVendorCredit {
                    refund_id: id,
                    credit_amount: request.refund_amount(),
                    credit_reference: "BCW-5521".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        )
    }

    #[test]
    fn submit_emits_submitted_and_snapshots_amounts() {
        let refund_id = RefundId::new();
        let request = RefundRequest::empty(refund_id);
        let cmd = submit_cmd(refund_id, None);

        let events = request.handle(&RefundCommand::Submit(cmd)).unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            RefundEvent::Submitted(e) => {
                assert_eq!(e.refund_id, refund_id);
                assert_eq!(e.original_amount, Money::from_minor_units(2499));
                assert_eq!(e.refund_amount, Money::from_minor_units(2499));
                assert!(e.refund_number.starts_with("RF-"));
                assert_eq!(e.refund_number.len(), 15);
            }
            other => panic!("expected Submitted, got {other:?}"),
        }
    }

    #[test]
    fn submit_rejects_duplicate_submission() {
        let request = submitted_request();
        let err = request
            .handle(&RefundCommand::Submit(submit_cmd(request.id_typed(), None)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn submit_requires_items() {
        let refund_id = RefundId::new();
        let request = RefundRequest::empty(refund_id);
        let mut cmd = submit_cmd(refund_id, None);
        cmd.items.clear();

        let err = request.handle(&RefundCommand::Submit(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_rejects_amount_above_original() {
        let refund_id = RefundId::new();
        let request = RefundRequest::empty(refund_id);
        let cmd = submit_cmd(refund_id, Some(Money::from_minor_units(2500)));

        let err = request.handle(&RefundCommand::Submit(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_accepts_partial_amounts() {
        let refund_id = RefundId::new();
        let mut request = RefundRequest::empty(refund_id);
        let cmd = submit_cmd(refund_id, Some(Money::from_minor_units(1000)));

        let events = request.handle(&RefundCommand::Submit(cmd)).unwrap();
        request.apply(&events[0]);
        assert_eq!(request.refund_amount(), Money::from_minor_units(1000));
        assert_eq!(request.original_amount(), Money::from_minor_units(2499));
    }

    #[test]
    fn approve_may_reduce_but_never_raise_the_amount() {
        let mut request = submitted_request();
        let id = request.id_typed();

        let err = request
            .handle(&RefundCommand::Approve(ApproveRefund {
                refund_id: id,
                approved_amount: Some(Money::from_minor_units(9_999)),
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        advance(
            &mut request,
            vec![RefundCommand::Approve(ApproveRefund {
                refund_id: id,
                approved_amount: Some(Money::from_minor_units(2000)),
                actor: operator(),
                occurred_at: test_time(),
            })],
        );
        assert_eq!(request.state(), RefundState::Approved);
        assert_eq!(request.refund_amount(), Money::from_minor_units(2000));
    }

    #[test]
    fn deny_requires_a_reason_and_is_terminal() {
        let mut request = submitted_request();
        let id = request.id_typed();

        let err = request
            .handle(&RefundCommand::Deny(DenyRefund {
                refund_id: id,
                denial_reason: "  ".to_string(),
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(request.state(), RefundState::Requested);

        advance(
            &mut request,
            vec![RefundCommand::Deny(DenyRefund {
                refund_id: id,
                denial_reason: "policy".to_string(),
                actor: operator(),
                occurred_at: test_time(),
            })],
        );
        assert_eq!(request.state(), RefundState::Denied);

        let err = request
            .handle(&RefundCommand::Cancel(CancelRefund {
                refund_id: id,
                note: None,
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn full_lifecycle_reaches_completed() {
        let mut request = submitted_request();
        let id = request.id_typed();

        advance(
            &mut request,
            vec![
                RefundCommand::StartReview(StartReview {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::Approve(ApproveRefund {
                    refund_id: id,
                    approved_amount: None,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::InitiateReturn(InitiateVendorReturn {
                    refund_id: id,
                    return_carrier: "UPS".to_string(),
                    return_tracking_number: "1Z999".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::MarkReturnInTransit(MarkReturnInTransit {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::MarkReturnReceived(MarkReturnReceived {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::RequestCredit(RequestVendorCredit {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::RecordCredit(RecordVendorCredit {
                    refund_id: id,
                    credit_amount: Money::from_minor_units(2499),
                    credit_reference: "BCW-5521".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::ConfirmSettlement(ConfirmSettlement {
                    refund_id: id,
                    settlement_reference: "stl_784".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );

        assert_eq!(request.state(), RefundState::Completed);
        assert_eq!(request.vendor_credit_amount(), Some(Money::from_minor_units(2499)));
        assert_eq!(request.settlement_reference(), Some("stl_784"));
        // submit + 9 commands, confirm emits two events
        assert_eq!(request.version(), 11);
    }

    #[test]
    fn settlement_cannot_start_before_credit_received() {
        let mut request = submitted_request();
        let id = request.id_typed();
        advance(
            &mut request,
            vec![RefundCommand::Approve(ApproveRefund {
                refund_id: id,
                approved_amount: None,
                actor: operator(),
                occurred_at: test_time(),
            })],
        );

        let err = request
            .handle(&RefundCommand::BeginSettlement(BeginSettlement {
                refund_id: id,
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(request.state(), RefundState::Approved);
    }

    #[test]
    fn credit_is_recorded_once_and_never_overwritten() {
        let mut request = submitted_request();
        to_credit_received(&mut request);
        let id = request.id_typed();
        assert_eq!(request.state(), RefundState::VendorCreditReceived);

        let err = request
            .handle(&RefundCommand::RecordCredit(RecordVendorCredit {
                refund_id: id,
                credit_amount: Money::from_minor_units(1),
                credit_reference: "BCW-9999".to_string(),
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(request.credit_reference(), Some("BCW-5521"));
    }

    #[test]
    fn under_credit_records_then_escalates() {
        let mut request = submitted_request();
        let id = request.id_typed();
        advance(
            &mut request,
            vec![
                RefundCommand::Approve(ApproveRefund {
                    refund_id: id,
                    approved_amount: None,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::InitiateReturn(InitiateVendorReturn {
                    refund_id: id,
                    return_carrier: "UPS".to_string(),
                    return_tracking_number: "1Z999".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );

        let events = request
            .handle(&RefundCommand::RecordCredit(RecordVendorCredit {
                refund_id: id,
                credit_amount: Money::from_minor_units(2124),
                credit_reference: "BCW-5521".to_string(),
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RefundEvent::CreditRecorded(_)));
        assert!(matches!(events[1], RefundEvent::Escalated(_)));

        for event in &events {
            request.apply(event);
        }
        assert_eq!(request.state(), RefundState::Exception);
        assert_eq!(request.exception_return_state(), Some(RefundState::VendorCreditReceived));
        assert_eq!(request.vendor_credit_amount(), Some(Money::from_minor_units(2124)));

        // Operator accepts the shortfall and resumes; settlement may proceed.
        advance(
            &mut request,
            vec![
                RefundCommand::ResolveException(ResolveException {
                    refund_id: id,
                    resolution: ExceptionResolution::Resume,
                    note: Some("restocking fee accepted".to_string()),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );
        assert_eq!(request.state(), RefundState::CustomerRefundProcessing);
    }

    #[test]
    fn settlement_failures_count_attempts_then_escalate() {
        let mut request = submitted_request();
        to_credit_received(&mut request);
        let id = request.id_typed();

        advance(
            &mut request,
            vec![
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::FailSettlement(FailSettlement {
                    refund_id: id,
                    reason: "gateway timeout".to_string(),
                    max_attempts: 2,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );
        assert_eq!(request.state(), RefundState::VendorCreditReceived);
        assert_eq!(request.settlement_attempts(), 1);

        let events = advance(
            &mut request,
            vec![
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::FailSettlement(FailSettlement {
                    refund_id: id,
                    reason: "gateway unavailable".to_string(),
                    max_attempts: 2,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );
        assert_eq!(request.state(), RefundState::Exception);
        assert_eq!(request.settlement_attempts(), 2);
        assert!(matches!(events.last(), Some(RefundEvent::Escalated(_))));
    }

    #[test]
    fn cancel_is_rejected_while_settlement_is_outstanding() {
        let mut request = submitted_request();
        to_credit_received(&mut request);
        let id = request.id_typed();
        advance(
            &mut request,
            vec![RefundCommand::BeginSettlement(BeginSettlement {
                refund_id: id,
                actor: operator(),
                occurred_at: test_time(),
            })],
        );

        let err = request
            .handle(&RefundCommand::Cancel(CancelRefund {
                refund_id: id,
                note: None,
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(request.state(), RefundState::CustomerRefundProcessing);
    }

    #[test]
    fn exception_state_blocks_normal_actions_with_a_distinct_error() {
        let mut request = submitted_request();
        let id = request.id_typed();
        advance(
            &mut request,
            vec![RefundCommand::FlagException(FlagException {
                refund_id: id,
                reason: "order data inconsistent".to_string(),
                actor: operator(),
                occurred_at: test_time(),
            })],
        );
        assert_eq!(request.state(), RefundState::Exception);

        let err = request
            .handle(&RefundCommand::Approve(ApproveRefund {
                refund_id: id,
                approved_amount: None,
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::ExceptionState(_)));
    }

    #[test]
    fn resolve_exception_resumes_the_state_captured_at_escalation() {
        let mut request = submitted_request();
        let id = request.id_typed();
        advance(
            &mut request,
            vec![
                RefundCommand::StartReview(StartReview {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::FlagException(FlagException {
                    refund_id: id,
                    reason: "possible duplicate order".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::ResolveException(ResolveException {
                    refund_id: id,
                    resolution: ExceptionResolution::Resume,
                    note: None,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );
        assert_eq!(request.state(), RefundState::UnderReview);
        assert_eq!(request.exception_reason(), None);
    }

    #[test]
    fn resolve_exception_can_cancel_outright() {
        let mut request = submitted_request();
        let id = request.id_typed();
        advance(
            &mut request,
            vec![
                RefundCommand::FlagException(FlagException {
                    refund_id: id,
                    reason: "fraud review".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::ResolveException(ResolveException {
                    refund_id: id,
                    resolution: ExceptionResolution::Cancel,
                    note: None,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        );
        assert_eq!(request.state(), RefundState::Cancelled);
    }

    #[test]
    fn credit_precedes_issue_in_the_event_log() {
        let mut request = submitted_request();
        let mut log = to_credit_received(&mut request);
        let id = request.id_typed();
        log.extend(advance(
            &mut request,
            vec![
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::ConfirmSettlement(ConfirmSettlement {
                    refund_id: id,
                    settlement_reference: "stl_1".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        ));

        let credit_at = log
            .iter()
            .position(|e| matches!(e, RefundEvent::CreditRecorded(_)))
            .unwrap();
        let issued_at = log
            .iter()
            .position(|e| matches!(e, RefundEvent::Issued(_)))
            .unwrap();
        assert!(credit_at < issued_at);
    }

    #[test]
    fn commands_against_an_unsubmitted_request_are_not_found() {
        let refund_id = RefundId::new();
        let request = RefundRequest::empty(refund_id);
        let err = request
            .handle(&RefundCommand::Approve(ApproveRefund {
                refund_id,
                approved_amount: None,
                actor: operator(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn version_increments_on_apply() {
        let mut request = submitted_request();
        assert_eq!(request.version(), 1);
        let id = request.id_typed();

        advance(
            &mut request,
            vec![RefundCommand::StartReview(StartReview {
                refund_id: id,
                actor: operator(),
                occurred_at: test_time(),
            })],
        );
        assert_eq!(request.version(), 2);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let request = submitted_request();
        let id = request.id_typed();
        let before = request.clone();

        let cmd = RefundCommand::Approve(ApproveRefund {
            refund_id: id,
            approved_amount: None,
            actor: operator(),
            occurred_at: test_time(),
        });
        let first = request.handle(&cmd).unwrap();
        let second = request.handle(&cmd).unwrap();

        assert_eq!(request, before);
        assert_eq!(first, second);
    }

    #[test]
    fn apply_is_deterministic() {
        let refund_id = RefundId::new();
        let source = {
            let mut request = RefundRequest::empty(refund_id);
            let events = request
                .handle(&RefundCommand::Submit(submit_cmd(refund_id, None)))
                .unwrap();
            for event in &events {
                request.apply(event);
            }
            let mut log = events;
            log.extend(to_credit_received(&mut request));
            log
        };

        let first = RefundRequest::replay(refund_id, &source);
        let second = RefundRequest::replay(refund_id, &source);
        assert_eq!(first, second);
        assert_eq!(first.state(), RefundState::VendorCreditReceived);
        assert_eq!(first.version(), source.len() as u64);
    }

    #[test]
    fn applied_transitions_follow_the_state_table() {
        // Every event applied from a legal handle() call must move along an
        // edge the table declares (resume is the one data-dependent exit).
        let mut request = submitted_request();
        let mut log = to_credit_received(&mut request);
        let id = request.id_typed();
        log.extend(advance(
            &mut request,
            vec![
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor: operator(),
                    occurred_at: test_time(),
                }),
                RefundCommand::ConfirmSettlement(ConfirmSettlement {
                    refund_id: id,
                    settlement_reference: "stl_9".to_string(),
                    actor: operator(),
                    occurred_at: test_time(),
                }),
            ],
        ));

        let mut shadow = RefundRequest::empty(id);
        for event in &log {
            let from = shadow.state();
            let was_submitted = shadow.is_submitted();
            shadow.apply(event);
            if !was_submitted {
                assert_eq!(shadow.state(), RefundState::Requested);
                continue;
            }
            let edge_listed = EDGES
                .iter()
                .any(|(f, a, t)| *f == from && *a == event.action() && *t == shadow.state());
            assert!(edge_listed, "no edge for {from} --{}--> {}", event.action(), shadow.state());
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            StartReview,
            Approve(Option<u64>),
            Deny,
            InitiateReturn,
            MarkInTransit,
            MarkReceived,
            RequestCredit,
            RecordCredit(u64),
            BeginSettlement,
            ConfirmSettlement,
            FailSettlement(u32),
            Cancel,
            FlagException,
            Resolve(bool),
        }

        fn arb_step() -> impl Strategy<Value = Step> {
            prop_oneof![
                Just(Step::StartReview),
                (proptest::option::of(1u64..5_000)).prop_map(Step::Approve),
                Just(Step::Deny),
                Just(Step::InitiateReturn),
                Just(Step::MarkInTransit),
                Just(Step::MarkReceived),
                Just(Step::RequestCredit),
                (1u64..5_000).prop_map(Step::RecordCredit),
                Just(Step::BeginSettlement),
                Just(Step::ConfirmSettlement),
                (1u32..4).prop_map(Step::FailSettlement),
                Just(Step::Cancel),
                Just(Step::FlagException),
                proptest::bool::ANY.prop_map(Step::Resolve),
            ]
        }

        fn command_for(step: &Step, id: RefundId) -> RefundCommand {
            let actor = Actor::new("prop.operator").unwrap();
            let at = Utc::now();
            match step {
                Step::StartReview => RefundCommand::StartReview(StartReview {
                    refund_id: id,
                    actor,
                    occurred_at: at,
                }),
                Step::Approve(amount) => RefundCommand::Approve(ApproveRefund {
                    refund_id: id,
                    approved_amount: amount.map(Money::from_minor_units),
                    actor,
                    occurred_at: at,
                }),
                Step::Deny => RefundCommand::Deny(DenyRefund {
                    refund_id: id,
                    denial_reason: "policy".to_string(),
                    actor,
                    occurred_at: at,
                }),
                Step::InitiateReturn => RefundCommand::InitiateReturn(InitiateVendorReturn {
                    refund_id: id,
                    return_carrier: "UPS".to_string(),
                    return_tracking_number: "1Z999".to_string(),
                    actor,
                    occurred_at: at,
                }),
                Step::MarkInTransit => RefundCommand::MarkReturnInTransit(MarkReturnInTransit {
                    refund_id: id,
                    actor,
                    occurred_at: at,
                }),
                Step::MarkReceived => RefundCommand::MarkReturnReceived(MarkReturnReceived {
                    refund_id: id,
                    actor,
                    occurred_at: at,
                }),
                Step::RequestCredit => RefundCommand::RequestCredit(RequestVendorCredit {
                    refund_id: id,
                    actor,
                    occurred_at: at,
                }),
                Step::RecordCredit(minor) => RefundCommand::RecordCredit(RecordVendorCredit {
                    refund_id: id,
                    credit_amount: Money::from_minor_units(*minor),
                    credit_reference: "BCW-1".to_string(),
                    actor,
                    occurred_at: at,
                }),
                Step::BeginSettlement => RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id: id,
                    actor,
                    occurred_at: at,
                }),
                Step::ConfirmSettlement => RefundCommand::ConfirmSettlement(ConfirmSettlement {
                    refund_id: id,
                    settlement_reference: "stl_prop".to_string(),
                    actor,
                    occurred_at: at,
                }),
                Step::FailSettlement(max) => RefundCommand::FailSettlement(FailSettlement {
                    refund_id: id,
                    reason: "gateway down".to_string(),
                    max_attempts: *max,
                    actor,
                    occurred_at: at,
                }),
                Step::Cancel => RefundCommand::Cancel(CancelRefund {
                    refund_id: id,
                    note: None,
                    actor,
                    occurred_at: at,
                }),
                Step::FlagException => RefundCommand::FlagException(FlagException {
                    refund_id: id,
                    reason: "inconsistency".to_string(),
                    actor,
                    occurred_at: at,
                }),
                Step::Resolve(resume) => RefundCommand::ResolveException(ResolveException {
                    refund_id: id,
                    resolution: if *resume {
                        ExceptionResolution::Resume
                    } else {
                        ExceptionResolution::Cancel
                    },
                    note: None,
                    actor,
                    occurred_at: at,
                }),
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Whatever sequence of actions is thrown at a request, the core
            /// invariants hold: bounded amount, versions matching the log,
            /// credit strictly before issue, terminal states emitting nothing,
            /// and a log fold that reproduces the live state.
            #[test]
            fn random_action_sequences_preserve_invariants(
                steps in prop::collection::vec(arb_step(), 0..40),
                requested in 1u64..4_999,
            ) {
                let refund_id = RefundId::new();
                let mut request = RefundRequest::empty(refund_id);
                let mut cmd = SubmitRefund {
                    refund_id,
                    order_id: OrderId::new(),
                    refund_number: refund_number_for(refund_id),
                    reason: RefundReason::Other,
                    items: vec![RefundItem {
                        order_line_id: OrderLineId::new(),
                        product_name: "Prop Item".to_string(),
                        quantity: 1,
                        unit_price: Money::from_minor_units(4_999),
                    }],
                    requested_amount: None,
                    notes: None,
                    actor: Actor::new("prop.customer").unwrap(),
                    occurred_at: Utc::now(),
                };
                cmd.requested_amount = Some(Money::from_minor_units(requested));

                let mut log = request.handle(&RefundCommand::Submit(cmd)).unwrap();
                for event in &log {
                    request.apply(event);
                }

                for step in &steps {
                    let was_terminal = request.state().is_terminal();
                    match request.handle(&command_for(step, refund_id)) {
                        Ok(events) => {
                            prop_assert!(!was_terminal, "terminal state emitted events for {step:?}");
                            prop_assert!(!events.is_empty());
                            for event in &events {
                                request.apply(event);
                            }
                            log.extend(events);
                        }
                        Err(_) => {
                            // Rejected commands must leave no trace.
                        }
                    }

                    prop_assert!(request.refund_amount() <= request.original_amount());
                    prop_assert_eq!(request.version(), log.len() as u64);
                }

                if request.state() == RefundState::Completed {
                    let credit_at = log.iter().position(|e| matches!(e, RefundEvent::CreditRecorded(_)));
                    let issued_at = log.iter().position(|e| matches!(e, RefundEvent::Issued(_)));
                    prop_assert!(credit_at.is_some() && issued_at.is_some());
                    prop_assert!(credit_at < issued_at);
                }

                let folded = RefundRequest::replay(refund_id, &log);
                prop_assert_eq!(folded, request);
            }
        }
    }
}
