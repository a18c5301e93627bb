//! Customer settlement gateway seam with retry and backoff logic.
//!
//! The workflow only ever talks to the payment provider through
//! [`SettlementGateway`]; everything provider-specific stays behind the trait.
//! [`issue_with_retry`] adds bounded, deterministic backoff around a single
//! settlement call. Exhausting the per-call budget is reported to the caller,
//! which decides whether to schedule another call or escalate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use refundgate_core::{Money, RefundId};

/// Instruction to pay a customer back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementInstruction {
    pub refund_id: RefundId,
    pub refund_number: String,
    pub amount: Money,
}

/// Provider acknowledgement of an issued refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementConfirmation {
    /// Provider-side reference for reconciliation.
    pub reference: String,
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("settlement attempt timed out")]
    Timeout,
    /// The provider refused the instruction; retrying will not help.
    #[error("settlement rejected: {0}")]
    Rejected(String),
    #[error("settlement provider unavailable: {0}")]
    Unavailable(String),
}

impl SettlementError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SettlementError::Rejected(_))
    }
}

/// Payment provider abstraction for issuing customer refunds.
#[async_trait::async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn issue_refund(
        &self,
        instruction: &SettlementInstruction,
    ) -> Result<SettlementConfirmation, SettlementError>;
}

#[async_trait::async_trait]
impl<T: SettlementGateway + ?Sized> SettlementGateway for std::sync::Arc<T> {
    async fn issue_refund(
        &self,
        instruction: &SettlementInstruction,
    ) -> Result<SettlementConfirmation, SettlementError> {
        (**self).issue_refund(instruction).await
    }
}

/// Retry configuration for a single settlement call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Budget for one gateway round trip.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Read overrides from `SETTLEMENT_RETRIES` and `SETTLEMENT_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_attempts = std::env::var("SETTLEMENT_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);
        let attempt_timeout = std::env::var("SETTLEMENT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.attempt_timeout);
        Self {
            max_attempts,
            attempt_timeout,
            ..defaults
        }
    }

    /// Delay before the attempt after `attempt` (1-based), doubling up to
    /// `max_delay`. Deterministic so tests and reruns behave identically.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Issue one settlement instruction, retrying transient failures.
///
/// Rejections return immediately; timeouts and provider outages are retried
/// up to `policy.max_attempts` with exponential backoff. The last error is
/// returned once the budget is spent.
pub async fn issue_with_retry(
    gateway: &dyn SettlementGateway,
    policy: &RetryPolicy,
    instruction: &SettlementInstruction,
) -> Result<SettlementConfirmation, SettlementError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        let outcome =
            match tokio::time::timeout(policy.attempt_timeout, gateway.issue_refund(instruction))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SettlementError::Timeout),
            };

        match outcome {
            Ok(confirmation) => return Ok(confirmation),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        refund_number = %instruction.refund_number,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "settlement attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(SettlementError::Timeout))
}

/// In-process gateway that always succeeds.
///
/// Default gateway when no provider is configured; also what the tests drive.
/// Records every instruction and hands out sequential `stl_` references.
#[derive(Debug, Default)]
pub struct MockSettlementGateway {
    seen: Mutex<Vec<SettlementInstruction>>,
}

impl MockSettlementGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        match self.seen.lock() {
            Ok(seen) => seen.len() as u32,
            Err(_) => 0,
        }
    }

    pub fn instructions(&self) -> Vec<SettlementInstruction> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl SettlementGateway for MockSettlementGateway {
    async fn issue_refund(
        &self,
        instruction: &SettlementInstruction,
    ) -> Result<SettlementConfirmation, SettlementError> {
        let reference = match self.seen.lock() {
            Ok(mut seen) => {
                seen.push(instruction.clone());
                format!("stl_{:06}", seen.len())
            }
            Err(_) => {
                return Err(SettlementError::Unavailable(
                    "mock gateway state poisoned".to_string(),
                ))
            }
        };
        Ok(SettlementConfirmation { reference })
    }
}

/// Gateway that fails its first `fail_first` calls, then succeeds.
#[derive(Debug)]
pub struct FlakyGateway {
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyGateway {
    pub fn failing(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SettlementGateway for FlakyGateway {
    async fn issue_refund(
        &self,
        _instruction: &SettlementInstruction,
    ) -> Result<SettlementConfirmation, SettlementError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(SettlementError::Unavailable(format!(
                "simulated outage on call {call}"
            )));
        }
        Ok(SettlementConfirmation {
            reference: format!("stl_{call:06}"),
        })
    }
}

/// Gateway that never succeeds.
#[derive(Debug, Default)]
pub struct AlwaysFailGateway {
    calls: AtomicU32,
}

impl AlwaysFailGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SettlementGateway for AlwaysFailGateway {
    async fn issue_refund(
        &self,
        _instruction: &SettlementInstruction,
    ) -> Result<SettlementConfirmation, SettlementError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SettlementError::Unavailable(
            "settlement provider offline".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction() -> SettlementInstruction {
        SettlementInstruction {
            refund_id: RefundId::new(),
            refund_number: "RF-TEST".to_string(),
            amount: Money::from_minor_units(2499),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_secs(2));
        // Large attempt numbers must not overflow.
        assert_eq!(policy.delay_for(40), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn first_success_needs_no_retry() {
        let gateway = MockSettlementGateway::new();
        let confirmation = issue_with_retry(&gateway, &fast_policy(3), &instruction())
            .await
            .unwrap();

        assert_eq!(confirmation.reference, "stl_000001");
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let gateway = FlakyGateway::failing(2);
        let confirmation = issue_with_retry(&gateway, &fast_policy(3), &instruction())
            .await
            .unwrap();

        assert_eq!(gateway.calls(), 3);
        assert_eq!(confirmation.reference, "stl_000003");
    }

    #[tokio::test]
    async fn exhausted_attempts_return_the_last_error() {
        let gateway = AlwaysFailGateway::new();
        let err = issue_with_retry(&gateway, &fast_policy(2), &instruction())
            .await
            .unwrap_err();

        assert_eq!(gateway.calls(), 2);
        assert!(matches!(err, SettlementError::Unavailable(_)));
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        struct RejectingGateway {
            calls: AtomicU32,
        }

        #[async_trait::async_trait]
        impl SettlementGateway for RejectingGateway {
            async fn issue_refund(
                &self,
                _instruction: &SettlementInstruction,
            ) -> Result<SettlementConfirmation, SettlementError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(SettlementError::Rejected("card account closed".to_string()))
            }
        }

        let gateway = RejectingGateway {
            calls: AtomicU32::new(0),
        };
        let err = issue_with_retry(&gateway, &fast_policy(3), &instruction())
            .await
            .unwrap_err();

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SettlementError::Rejected(_)));
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        struct SlowGateway;

        #[async_trait::async_trait]
        impl SettlementGateway for SlowGateway {
            async fn issue_refund(
                &self,
                _instruction: &SettlementInstruction,
            ) -> Result<SettlementConfirmation, SettlementError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(SettlementConfirmation {
                    reference: "stl_slow".to_string(),
                })
            }
        }

        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(5),
            ..fast_policy(2)
        };
        let err = issue_with_retry(&SlowGateway, &policy, &instruction())
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Timeout));
    }
}
