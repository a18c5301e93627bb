//! Pure precondition checks, shared by every transition handler.
//!
//! Guards look only at the payload and the aggregate values handed to them;
//! they never read the state table (that is [`crate::state_table`]'s job) and
//! never touch IO. A guard failure means the transition is rejected with no
//! state mutation at all.

use refundgate_core::{DomainError, DomainResult, Money};

use crate::request::RefundItem;

/// Require a non-blank string field.
pub fn non_empty(field: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// A refund covers at least one item, and no item claims a zero quantity.
pub fn items_present(items: &[RefundItem]) -> DomainResult<()> {
    if items.is_empty() {
        return Err(DomainError::validation("refund must cover at least one item"));
    }
    for item in items {
        if item.quantity == 0 {
            return Err(DomainError::validation(format!(
                "item '{}' has zero quantity",
                item.product_name
            )));
        }
    }
    Ok(())
}

/// Require a strictly positive amount.
pub fn amount_positive(field: &'static str, amount: Money) -> DomainResult<()> {
    if amount.is_zero() {
        return Err(DomainError::validation(format!("{field} must be greater than zero")));
    }
    Ok(())
}

/// The amount to refund can never exceed the original sale value.
pub fn amount_within(refund_amount: Money, original_amount: Money) -> DomainResult<()> {
    if refund_amount > original_amount {
        return Err(DomainError::validation(format!(
            "refund amount {refund_amount} exceeds original amount {original_amount}"
        )));
    }
    Ok(())
}

/// An approval may keep or reduce the pending amount, never raise it.
pub fn approved_amount_within(approved: Money, current: Money) -> DomainResult<()> {
    amount_positive("approved amount", approved)?;
    if approved > current {
        return Err(DomainError::validation(format!(
            "approved amount {approved} exceeds requested amount {current}"
        )));
    }
    Ok(())
}
