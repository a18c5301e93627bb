//! Actor identity recorded on every workflow transition.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Who performed a transition (customer id, operator login, or a system name).
///
/// The engine does not authenticate actors; the upstream gateway does. This type
/// only guarantees the audit trail never records a blank identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

const MAX_ACTOR_LEN: usize = 128;

impl Actor {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("actor must not be empty"));
        }
        if trimmed.len() > MAX_ACTOR_LEN {
            return Err(DomainError::validation(format!(
                "actor exceeds {MAX_ACTOR_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Actor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Actor::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let actor = Actor::new("  ops.jane  ").unwrap();
        assert_eq!(actor.as_str(), "ops.jane");
    }

    #[test]
    fn rejects_blank_identities() {
        assert!(Actor::new("").is_err());
        assert!(Actor::new("   ").is_err());
    }

    #[test]
    fn rejects_oversized_identities() {
        let long = "x".repeat(MAX_ACTOR_LEN + 1);
        assert!(Actor::new(long).is_err());
    }
}
