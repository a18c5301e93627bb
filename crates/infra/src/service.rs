//! Application service for the refund workflow.
//!
//! [`RefundService`] is the one entry point callers use: it validates submit
//! requests against the order directory, runs commands through the
//! [`CommandExecutor`], drives the settlement leg against the gateway, and
//! answers queries from the projection. HTTP handlers stay thin; everything
//! they do goes through here.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use refundgate_core::{
    Actor, AggregateId, AggregateRoot, Money, OrderId, OrderLineId, RefundId,
};
use refundgate_events::{EventEnvelope, InMemoryEventBus};
use refundgate_orders::OrderDirectory;
use refundgate_refunds::{
    audit_trail, refund_number_for, AuditEntry, BeginSettlement, ConfirmSettlement, FailSettlement,
    RefundCommand, RefundEvent, RefundItem, RefundReason, RefundRequest, SubmitRefund,
    REFUND_AGGREGATE_TYPE,
};

use crate::event_store::{EventStore, EventStoreError};
use crate::executor::{CommandExecutor, ExecutorError};
use crate::projections::{RefundProjectionError, RefundStats, RefundView, RefundsProjection};
use crate::read_model::InMemoryReadModelStore;
use crate::settlement::{issue_with_retry, RetryPolicy, SettlementGateway, SettlementInstruction};

pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type SharedRefundViews = Arc<InMemoryReadModelStore<RefundId, RefundView>>;
pub type SharedRefundsProjection = Arc<RefundsProjection<SharedRefundViews>>;

/// One line of a submit request, referencing the order by line id.
#[derive(Debug, Clone)]
pub struct SubmitItemSpec {
    pub order_line_id: OrderLineId,
    pub quantity: u32,
}

/// Everything the caller provides to open a refund request.
#[derive(Debug, Clone)]
pub struct SubmitSpec {
    pub order_id: OrderId,
    pub items: Vec<SubmitItemSpec>,
    pub reason: RefundReason,
    /// `None` requests the full value of the listed items.
    pub requested_amount: Option<Money>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundServiceConfig {
    /// Failed settlement calls tolerated before the request escalates.
    pub max_settlement_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for RefundServiceConfig {
    fn default() -> Self {
        Self {
            max_settlement_attempts: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl RefundServiceConfig {
    /// Read overrides from `SETTLEMENT_MAX_ATTEMPTS` plus the retry policy's
    /// own environment knobs.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_settlement_attempts = std::env::var("SETTLEMENT_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_settlement_attempts);
        Self {
            max_settlement_attempts,
            retry: RetryPolicy::from_env(),
        }
    }
}

pub struct RefundService {
    executor: CommandExecutor<Arc<dyn EventStore>, SharedBus>,
    store: Arc<dyn EventStore>,
    bus: SharedBus,
    orders: Arc<dyn OrderDirectory>,
    projection: SharedRefundsProjection,
    gateway: Arc<dyn SettlementGateway>,
    config: RefundServiceConfig,
}

impl RefundService {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: SharedBus,
        orders: Arc<dyn OrderDirectory>,
        projection: SharedRefundsProjection,
        gateway: Arc<dyn SettlementGateway>,
        config: RefundServiceConfig,
    ) -> Self {
        Self {
            executor: CommandExecutor::new(store.clone(), bus.clone()),
            store,
            bus,
            orders,
            projection,
            gateway,
            config,
        }
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn orders(&self) -> &Arc<dyn OrderDirectory> {
        &self.orders
    }

    pub fn projection(&self) -> &SharedRefundsProjection {
        &self.projection
    }

    pub fn config(&self) -> &RefundServiceConfig {
        &self.config
    }

    /// Open a refund request for lines of an existing order.
    ///
    /// Validates the request against the order directory (line exists, not
    /// refunded yet, sane quantity), rejects lines already covered by an open
    /// refund, snapshots prices, and submits.
    #[instrument(skip(self, spec), fields(order_id = %spec.order_id), err)]
    pub async fn submit(
        &self,
        actor: Actor,
        spec: SubmitSpec,
    ) -> Result<RefundRequest, ExecutorError> {
        let order = self.orders.find_order(spec.order_id).ok_or_else(|| {
            ExecutorError::Validation(format!("unknown order {}", spec.order_id))
        })?;

        if spec.items.is_empty() {
            return Err(ExecutorError::Validation(
                "a refund request needs at least one item".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(spec.items.len());
        for item in &spec.items {
            let line = order.line(item.order_line_id).ok_or_else(|| {
                ExecutorError::Validation(format!(
                    "order {} has no line {}",
                    spec.order_id, item.order_line_id
                ))
            })?;
            if line.refunded {
                return Err(ExecutorError::Validation(format!(
                    "line {} was already refunded",
                    line.line_id
                )));
            }
            if item.quantity == 0 || item.quantity > line.quantity {
                return Err(ExecutorError::Validation(format!(
                    "quantity {} is out of range for line {} (ordered {})",
                    item.quantity, line.line_id, line.quantity
                )));
            }
            // The projection lags the store by a beat, so this check is
            // best-effort; it catches the common double-click, not a race.
            if let Some(open) = self.projection.active_view_for_line(item.order_line_id) {
                return Err(ExecutorError::Conflict(format!(
                    "an open refund ({}) already covers line {}",
                    open.refund_number, item.order_line_id
                )));
            }
            items.push(RefundItem {
                order_line_id: line.line_id,
                product_name: line.product_name.clone(),
                quantity: item.quantity,
                unit_price: line.unit_price,
            });
        }

        let refund_id = RefundId::new();
        let command = RefundCommand::Submit(SubmitRefund {
            refund_id,
            order_id: spec.order_id,
            refund_number: refund_number_for(refund_id),
            reason: spec.reason,
            items,
            requested_amount: spec.requested_amount,
            notes: spec.notes,
            actor,
            occurred_at: Utc::now(),
        });

        self.execute(refund_id, command, None).await
    }

    /// Execute a single workflow command against a refund request.
    ///
    /// `expected_version` is the caller's `If-Match` value; `None` skips the
    /// caller-side fence (the store-side optimistic check still applies).
    pub async fn execute(
        &self,
        refund_id: RefundId,
        command: RefundCommand,
        expected_version: Option<u64>,
    ) -> Result<RefundRequest, ExecutorError> {
        let outcome = self
            .executor
            .execute(
                AggregateId::from(refund_id),
                REFUND_AGGREGATE_TYPE,
                &command,
                expected_version,
                |id| RefundRequest::empty(RefundId::from(id)),
            )
            .await?;
        Ok(outcome.aggregate)
    }

    /// Run the settlement leg end to end: begin, call the gateway, then
    /// confirm or record the failure.
    ///
    /// `BeginSettlement` commits before the gateway sees the instruction, so
    /// a crash mid-call leaves a `CUSTOMER_REFUND_PROCESSING` request an
    /// operator can reconcile against the provider. A gateway failure is
    /// recorded (and may escalate) before this returns `GatewayFailure`.
    #[instrument(skip(self, actor), fields(refund_id = %refund_id), err)]
    pub async fn process_refund(
        &self,
        refund_id: RefundId,
        actor: Actor,
        expected_version: Option<u64>,
    ) -> Result<RefundRequest, ExecutorError> {
        let begun = self
            .execute(
                refund_id,
                RefundCommand::BeginSettlement(BeginSettlement {
                    refund_id,
                    actor: actor.clone(),
                    occurred_at: Utc::now(),
                }),
                expected_version,
            )
            .await?;

        let instruction = SettlementInstruction {
            refund_id,
            refund_number: begun.refund_number().to_string(),
            amount: begun.refund_amount(),
        };

        match issue_with_retry(self.gateway.as_ref(), &self.config.retry, &instruction).await {
            Ok(confirmation) => {
                info!(
                    refund_number = %instruction.refund_number,
                    reference = %confirmation.reference,
                    amount = %instruction.amount,
                    "settlement confirmed"
                );
                self.execute(
                    refund_id,
                    RefundCommand::ConfirmSettlement(ConfirmSettlement {
                        refund_id,
                        settlement_reference: confirmation.reference,
                        actor,
                        occurred_at: Utc::now(),
                    }),
                    Some(begun.version()),
                )
                .await
            }
            Err(err) => {
                warn!(
                    refund_number = %instruction.refund_number,
                    error = %err,
                    "settlement call failed"
                );
                self.execute(
                    refund_id,
                    RefundCommand::FailSettlement(FailSettlement {
                        refund_id,
                        reason: err.to_string(),
                        max_attempts: self.config.max_settlement_attempts,
                        actor,
                        occurred_at: Utc::now(),
                    }),
                    Some(begun.version()),
                )
                .await?;
                Err(ExecutorError::GatewayFailure(err.to_string()))
            }
        }
    }

    /// Rehydrate a refund request from its event stream.
    pub async fn get(&self, refund_id: RefundId) -> Result<RefundRequest, ExecutorError> {
        let request = self
            .executor
            .rehydrate(AggregateId::from(refund_id), |id| {
                RefundRequest::empty(RefundId::from(id))
            })
            .await?;
        if !request.is_submitted() {
            return Err(ExecutorError::NotFound);
        }
        Ok(request)
    }

    /// Load the ordered event log of one refund request.
    pub async fn load_events(
        &self,
        refund_id: RefundId,
    ) -> Result<Vec<(u64, RefundEvent)>, ExecutorError> {
        let stream = self.store.load_stream(AggregateId::from(refund_id)).await?;
        let mut events = Vec::with_capacity(stream.len());
        for stored in stream {
            let event: RefundEvent = serde_json::from_value(stored.payload)
                .map_err(|e| ExecutorError::Deserialize(e.to_string()))?;
            events.push((stored.sequence_number, event));
        }
        Ok(events)
    }

    /// Derive the audit trail from the event log.
    pub async fn audit(&self, refund_id: RefundId) -> Result<Vec<AuditEntry>, ExecutorError> {
        let events = self.load_events(refund_id).await?;
        if events.is_empty() {
            return Err(ExecutorError::NotFound);
        }
        let events: Vec<RefundEvent> = events.into_iter().map(|(_, ev)| ev).collect();
        Ok(audit_trail(refund_id, &events))
    }

    pub fn view(&self, refund_id: RefundId) -> Option<RefundView> {
        self.projection.get(&refund_id)
    }

    /// All refund views, newest submission first.
    pub fn list(&self) -> Vec<RefundView> {
        self.projection.list()
    }

    pub fn stats(&self) -> RefundStats {
        self.projection.stats()
    }

    /// Rebuild the projection from the full event store.
    #[instrument(skip(self), err)]
    pub async fn rebuild_projection(&self) -> Result<usize, ExecutorError> {
        let all = self.store.load_all().await?;
        let envelopes: Vec<EventEnvelope<JsonValue>> =
            all.iter().map(|stored| stored.to_envelope()).collect();
        let applied = self.projection.rebuild(envelopes).map_err(|e| match e {
            RefundProjectionError::Deserialize(msg) => ExecutorError::Deserialize(msg),
            other => ExecutorError::Store(EventStoreError::InvalidAppend(other.to_string())),
        })?;
        info!(applied, "refund projection rebuilt from the event store");
        Ok(applied)
    }
}
