//! Refund workflow domain module (event-sourced).
//!
//! This crate holds the business rules of the vendor-gated refund lifecycle,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). The one rule everything here exists to enforce: a customer is
//! never refunded before the vendor has confirmed credit for the returned
//! merchandise.

pub mod audit;
pub mod guards;
pub mod request;
pub mod state;
pub mod state_table;

pub use audit::{AuditEntry, audit_trail};
pub use request::{
    ApproveRefund, BeginSettlement, CancelRefund, ConfirmSettlement, CustomerRefundIssued,
    DenyRefund, ExceptionResolution, FailSettlement, FlagException, InitiateVendorReturn,
    MarkReturnInTransit, MarkReturnReceived, RecordVendorCredit, RefundApproved, RefundCancelled,
    RefundCommand, RefundCompleted, RefundDenied, RefundEscalated, RefundEvent,
    RefundExceptionResolved, RefundItem, RefundReason, RefundRequest, RefundSubmitted,
    RequestVendorCredit, ResolveException, ReviewStarted, SettlementFailed, SettlementStarted,
    StartReview, SubmitRefund, VendorCreditRecorded, VendorCreditRequested, VendorReturnInTransit,
    VendorReturnInitiated, VendorReturnReceived, REFUND_AGGREGATE_TYPE, refund_number_for,
};
pub use state::RefundState;
pub use state_table::RefundAction;
