use core::str::FromStr;
use serde::{Deserialize, Serialize};

use refundgate_core::DomainError;

/// Lifecycle states of a refund request.
///
/// The happy path runs top to bottom; `Cancelled` and `Exception` are side
/// exits. `Denied`, `Completed` and `Cancelled` are terminal: the state table
/// defines no outgoing edges for them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundState {
    Requested,
    UnderReview,
    Approved,
    Denied,
    VendorReturnInitiated,
    VendorReturnInTransit,
    VendorReturnReceived,
    VendorCreditPending,
    VendorCreditReceived,
    CustomerRefundProcessing,
    CustomerRefundIssued,
    Completed,
    Cancelled,
    Exception,
}

impl RefundState {
    pub const ALL: [RefundState; 14] = [
        RefundState::Requested,
        RefundState::UnderReview,
        RefundState::Approved,
        RefundState::Denied,
        RefundState::VendorReturnInitiated,
        RefundState::VendorReturnInTransit,
        RefundState::VendorReturnReceived,
        RefundState::VendorCreditPending,
        RefundState::VendorCreditReceived,
        RefundState::CustomerRefundProcessing,
        RefundState::CustomerRefundIssued,
        RefundState::Completed,
        RefundState::Cancelled,
        RefundState::Exception,
    ];

    /// Terminal states accept no further actions, ever.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RefundState::Denied | RefundState::Completed | RefundState::Cancelled
        )
    }

    /// Stable wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RefundState::Requested => "REQUESTED",
            RefundState::UnderReview => "UNDER_REVIEW",
            RefundState::Approved => "APPROVED",
            RefundState::Denied => "DENIED",
            RefundState::VendorReturnInitiated => "VENDOR_RETURN_INITIATED",
            RefundState::VendorReturnInTransit => "VENDOR_RETURN_IN_TRANSIT",
            RefundState::VendorReturnReceived => "VENDOR_RETURN_RECEIVED",
            RefundState::VendorCreditPending => "VENDOR_CREDIT_PENDING",
            RefundState::VendorCreditReceived => "VENDOR_CREDIT_RECEIVED",
            RefundState::CustomerRefundProcessing => "CUSTOMER_REFUND_PROCESSING",
            RefundState::CustomerRefundIssued => "CUSTOMER_REFUND_ISSUED",
            RefundState::Completed => "COMPLETED",
            RefundState::Cancelled => "CANCELLED",
            RefundState::Exception => "EXCEPTION",
        }
    }
}

impl core::fmt::Display for RefundState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        RefundState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown refund state '{s}'")))
    }
}
