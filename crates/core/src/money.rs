//! Monetary amounts as integer minor units.
//!
//! Amounts cross the API boundary as decimal strings ("24.99") and are parsed
//! exactly once into this type. Arithmetic is checked; nothing in the workflow
//! ever touches floating point.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A non-negative monetary amount in minor currency units (cents).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor_units(minor_units: u64) -> Self {
        Self(minor_units)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Multiply by a unit count (e.g. line quantity).
    pub fn checked_mul(self, count: u32) -> Option<Money> {
        self.0.checked_mul(u64::from(count)).map(Money)
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parse a decimal string with at most two fractional digits.
    ///
    /// Negative amounts, signs, grouping separators and scientific notation are
    /// all rejected; refunds only ever deal in plain non-negative decimals.
    fn from_str(s: &str) -> DomainResult<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(DomainError::validation("amount must not be empty"));
        }
        let (whole, frac) = match raw.split_once('.') {
            Some((whole, frac)) => (whole, Some(frac)),
            None => (raw, None),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "invalid amount '{raw}': expected a non-negative decimal"
            )));
        }
        let cents = match frac {
            None => 0,
            Some(frac) => {
                if frac.is_empty() || frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(DomainError::validation(format!(
                        "invalid amount '{raw}': at most two fractional digits"
                    )));
                }
                let digits: u64 = frac
                    .parse()
                    .map_err(|_| DomainError::validation(format!("invalid amount '{raw}'")))?;
                if frac.len() == 1 { digits * 10 } else { digits }
            }
        };
        let whole: u64 = whole.parse().map_err(|_| {
            DomainError::validation(format!("invalid amount '{raw}': out of range"))
        })?;
        whole
            .checked_mul(100)
            .and_then(|units| units.checked_add(cents))
            .map(Money)
            .ok_or_else(|| DomainError::validation(format!("invalid amount '{raw}': out of range")))
    }
}
