//! The static transition table of the refund workflow.
//!
//! Everything that gates a transition reads this table; no handler, screen or
//! service re-derives the rules. The table is plain data: one row per legal
//! `(from, action, to)` edge. Guards on payloads live in [`crate::guards`],
//! not here.

use crate::state::RefundState;

/// Every action the workflow understands, as a closed set.
///
/// The compiler forces each action to have edges and a handler; there is no
/// string-keyed dispatch and no "unknown action" fallthrough.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefundAction {
    /// Creates the aggregate; the only action with no source state.
    Submit,
    StartReview,
    Approve,
    Deny,
    InitiateReturn,
    MarkReturnInTransit,
    MarkReturnReceived,
    RequestCredit,
    RecordCredit,
    /// Entry into the settlement sub-state; the only way to start moving money.
    BeginSettlement,
    ConfirmSettlement,
    FailSettlement,
    Cancel,
    FlagException,
    /// Operator-only exit from `Exception`: resume into the state captured at
    /// escalation, or cancel outright.
    ResolveException,
}

impl RefundAction {
    pub const ALL: [RefundAction; 15] = [
        RefundAction::Submit,
        RefundAction::StartReview,
        RefundAction::Approve,
        RefundAction::Deny,
        RefundAction::InitiateReturn,
        RefundAction::MarkReturnInTransit,
        RefundAction::MarkReturnReceived,
        RefundAction::RequestCredit,
        RefundAction::RecordCredit,
        RefundAction::BeginSettlement,
        RefundAction::ConfirmSettlement,
        RefundAction::FailSettlement,
        RefundAction::Cancel,
        RefundAction::FlagException,
        RefundAction::ResolveException,
    ];

    /// Stable action name used in audit trail entries and error messages.
    pub fn name(self) -> &'static str {
        match self {
            RefundAction::Submit => "submit",
            RefundAction::StartReview => "start_review",
            RefundAction::Approve => "approve",
            RefundAction::Deny => "deny",
            RefundAction::InitiateReturn => "initiate_return",
            RefundAction::MarkReturnInTransit => "return_in_transit",
            RefundAction::MarkReturnReceived => "return_received",
            RefundAction::RequestCredit => "request_credit",
            RefundAction::RecordCredit => "record_credit",
            RefundAction::BeginSettlement => "begin_settlement",
            RefundAction::ConfirmSettlement => "confirm_settlement",
            RefundAction::FailSettlement => "fail_settlement",
            RefundAction::Cancel => "cancel",
            RefundAction::FlagException => "flag_exception",
            RefundAction::ResolveException => "resolve_exception",
        }
    }
}

impl core::fmt::Display for RefundAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

use RefundAction as A;
use RefundState as S;

/// One row per legal edge.
///
/// Notes on the non-obvious rows:
/// - `RecordCredit` accepts from any return-leg state: vendors sometimes issue
///   credit before the parcel is scanned in.
/// - `Cancel` has no row for `CustomerRefundProcessing`, so cancellation can
///   never race an outstanding settlement call.
/// - `ConfirmSettlement` owns two rows because confirming emits two events
///   (issued, then completed) inside one atomic append.
/// - `ResolveException` lists only its cancel edge; the resume edge's target
///   is the state captured at escalation and is applied by the aggregate.
pub const EDGES: &[(RefundState, RefundAction, RefundState)] = &[
    (S::Requested, A::StartReview, S::UnderReview),
    (S::Requested, A::Approve, S::Approved),
    (S::UnderReview, A::Approve, S::Approved),
    (S::Requested, A::Deny, S::Denied),
    (S::UnderReview, A::Deny, S::Denied),
    (S::Approved, A::InitiateReturn, S::VendorReturnInitiated),
    (S::VendorReturnInitiated, A::MarkReturnInTransit, S::VendorReturnInTransit),
    (S::VendorReturnInTransit, A::MarkReturnReceived, S::VendorReturnReceived),
    (S::VendorReturnReceived, A::RequestCredit, S::VendorCreditPending),
    (S::VendorReturnInitiated, A::RecordCredit, S::VendorCreditReceived),
    (S::VendorReturnInTransit, A::RecordCredit, S::VendorCreditReceived),
    (S::VendorReturnReceived, A::RecordCredit, S::VendorCreditReceived),
    (S::VendorCreditPending, A::RecordCredit, S::VendorCreditReceived),
    (S::VendorCreditReceived, A::BeginSettlement, S::CustomerRefundProcessing),
    (S::CustomerRefundProcessing, A::ConfirmSettlement, S::CustomerRefundIssued),
    (S::CustomerRefundIssued, A::ConfirmSettlement, S::Completed),
    (S::CustomerRefundProcessing, A::FailSettlement, S::VendorCreditReceived),
    (S::Requested, A::Cancel, S::Cancelled),
    (S::UnderReview, A::Cancel, S::Cancelled),
    (S::Approved, A::Cancel, S::Cancelled),
    (S::VendorReturnInitiated, A::Cancel, S::Cancelled),
    (S::VendorReturnInTransit, A::Cancel, S::Cancelled),
    (S::VendorReturnReceived, A::Cancel, S::Cancelled),
    (S::VendorCreditPending, A::Cancel, S::Cancelled),
    (S::VendorCreditReceived, A::Cancel, S::Cancelled),
    (S::Requested, A::FlagException, S::Exception),
    (S::UnderReview, A::FlagException, S::Exception),
    (S::Approved, A::FlagException, S::Exception),
    (S::VendorReturnInitiated, A::FlagException, S::Exception),
    (S::VendorReturnInTransit, A::FlagException, S::Exception),
    (S::VendorReturnReceived, A::FlagException, S::Exception),
    (S::VendorCreditPending, A::FlagException, S::Exception),
    (S::VendorCreditReceived, A::FlagException, S::Exception),
    (S::CustomerRefundProcessing, A::FlagException, S::Exception),
    (S::CustomerRefundIssued, A::FlagException, S::Exception),
    (S::Exception, A::ResolveException, S::Cancelled),
];

/// Is `action` legal from `state`?
pub fn allows(state: RefundState, action: RefundAction) -> bool {
    EDGES.iter().any(|(from, a, _)| *from == state && *a == action)
}

/// All states an action may be taken from.
pub fn allowed_from(action: RefundAction) -> Vec<RefundState> {
    let mut states: Vec<RefundState> = EDGES
        .iter()
        .filter(|(_, a, _)| *a == action)
        .map(|(from, _, _)| *from)
        .collect();
    states.dedup();
    states
}
