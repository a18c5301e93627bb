//! Strongly-typed identifiers used across the domain.
//!
//! Every id is a UUID under the hood, wrapped so a refund id cannot be
//! handed to an API expecting an order id. Serde sees the bare UUID
//! (`#[serde(transparent)]`), so the wire format stays plain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a refund request (the aggregate root of this service).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundId(Uuid);

/// Identifier of an order owned by the external order store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

/// Identifier of a single line item on an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderLineId(Uuid);

/// Identifier of an aggregate root as seen by the event store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! uuid_id {
    ($t:ident) => {
        impl $t {
            /// Mint a fresh identifier (UUIDv7, so roughly time-ordered).
            ///
            /// Tests that care about determinism should build ids with
            /// [`Self::from_uuid`] instead.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self).map_err(|e| {
                    DomainError::invalid_id(format!("{} must be a UUID: {e}", stringify!($t)))
                })
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(RefundId);
uuid_id!(OrderId);
uuid_id!(OrderLineId);
uuid_id!(AggregateId);

// The refund request is the only event-sourced aggregate, so its id and the
// store-facing AggregateId convert freely in both directions.
impl From<RefundId> for AggregateId {
    fn from(value: RefundId) -> Self {
        AggregateId(value.0)
    }
}

impl From<AggregateId> for RefundId {
    fn from(value: AggregateId) -> Self {
        RefundId(value.0)
    }
}
