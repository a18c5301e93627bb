use std::sync::Arc;

use chrono::Utc;

use refundgate_core::{Money, OrderId, OrderLineId, RefundId};
use refundgate_events::{EventBus, InMemoryEventBus};
use refundgate_infra::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use refundgate_infra::notify::{notice_for, NotificationSink, TracingNotificationSink};
use refundgate_infra::projections::RefundsProjection;
use refundgate_infra::read_model::InMemoryReadModelStore;
use refundgate_infra::service::{
    RefundService, RefundServiceConfig, SharedBus, SharedRefundViews, SharedRefundsProjection,
};
use refundgate_infra::settlement::{MockSettlementGateway, SettlementGateway};
use refundgate_orders::{InMemoryOrderDirectory, Order, OrderDirectory, OrderLine};
use refundgate_refunds::{RefundEvent, REFUND_AGGREGATE_TYPE};

/// Everything the handlers need, wired once at startup.
pub struct AppServices {
    refunds: Arc<RefundService>,
    orders: Arc<InMemoryOrderDirectory>,
}

impl AppServices {
    pub fn refunds(&self) -> &RefundService {
        &self.refunds
    }

    /// The order directory behind the service, for seeding in dev and tests.
    pub fn orders(&self) -> &Arc<InMemoryOrderDirectory> {
        &self.orders
    }
}

/// Build the service stack from the environment.
///
/// `USE_PERSISTENT_STORES=true` selects the Postgres event store (and
/// requires `DATABASE_URL`); anything else runs fully in memory. The order
/// directory and settlement gateway are in-process stand-ins either way
/// until real integrations are wired.
pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    let store: Arc<dyn EventStore> = if use_persistent {
        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        let store = PostgresEventStore::connect(&database_url)
            .await
            .expect("failed to connect to Postgres");
        Arc::new(store)
    } else {
        Arc::new(InMemoryEventStore::new())
    };

    let bus: SharedBus = Arc::new(InMemoryEventBus::new());
    let views: SharedRefundViews = Arc::new(InMemoryReadModelStore::new());
    let projection: SharedRefundsProjection = Arc::new(RefundsProjection::new(views));

    let orders = Arc::new(InMemoryOrderDirectory::new());
    if !use_persistent {
        seed_demo_orders(&orders);
    }
    let directory: Arc<dyn OrderDirectory> = orders.clone();

    tracing::warn!("no settlement provider wired; refunds settle against the in-process mock gateway");
    let gateway: Arc<dyn SettlementGateway> = Arc::new(MockSettlementGateway::new());

    let refunds = Arc::new(RefundService::new(
        store,
        bus,
        directory,
        projection,
        gateway,
        RefundServiceConfig::from_env(),
    ));

    // A persistent store can hold history from earlier runs; fold it into
    // the read model before serving.
    if use_persistent {
        if let Err(e) = refunds.rebuild_projection().await {
            tracing::warn!("projection rebuild on startup failed: {e}");
        }
    }

    spawn_event_subscriber(refunds.clone(), Arc::new(TracingNotificationSink));

    AppServices { refunds, orders }
}

/// Background subscriber: bus -> projection, notices, order bookkeeping.
///
/// Applies every committed refund event to the read model, emits the
/// customer-facing notice where one is due, and marks order lines refunded
/// once a request completes. All of it is fire-and-forget: a failure here
/// is logged and never blocks a transition.
fn spawn_event_subscriber(refunds: Arc<RefundService>, sink: Arc<dyn NotificationSink>) {
    let sub = refunds.bus().subscribe();
    tokio::task::spawn_blocking(move || loop {
        match sub.recv() {
            Ok(env) => {
                if env.aggregate_type() != REFUND_AGGREGATE_TYPE {
                    continue;
                }

                if let Err(e) = refunds.projection().apply_envelope(&env) {
                    tracing::warn!("projection apply failed: {e}");
                    continue;
                }

                let event: RefundEvent = match serde_json::from_value(env.payload().clone()) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("undecodable refund event payload: {e}");
                        continue;
                    }
                };

                let refund_id = RefundId::from(env.aggregate_id());
                let Some(view) = refunds.projection().get(&refund_id) else {
                    continue;
                };

                if let Some(notice) = notice_for(&view.refund_number, &event) {
                    sink.deliver(&notice);
                }

                if matches!(event, RefundEvent::Completed(_)) {
                    for line_id in &view.order_line_ids {
                        if !refunds.orders().mark_line_refunded(view.order_id, *line_id) {
                            tracing::warn!(
                                order_id = %view.order_id,
                                line_id = %line_id,
                                "completed refund references an unknown order line"
                            );
                        }
                    }
                }
            }
            Err(_) => break,
        }
    });
}

/// Dev-mode fixtures: a couple of orders to submit refunds against.
///
/// The engine does not own orders, so a fresh in-memory run would otherwise
/// have nothing to refund. The seeded ids are logged for curl sessions.
fn seed_demo_orders(orders: &InMemoryOrderDirectory) {
    let fixtures = [
        vec![
            OrderLine::new(OrderLineId::new(), "Deck Box", 1, Money::from_minor_units(2499)),
            OrderLine::new(OrderLineId::new(), "Card Sleeves", 3, Money::from_minor_units(599)),
        ],
        vec![
            OrderLine::new(OrderLineId::new(), "Play Mat", 2, Money::from_minor_units(1999)),
            OrderLine::new(OrderLineId::new(), "Binder Pack", 1, Money::from_minor_units(1250)),
        ],
    ];

    for lines in fixtures {
        let order_id = OrderId::new();
        for line in &lines {
            tracing::info!(
                order_id = %order_id,
                item_id = %line.line_id,
                product = %line.product_name,
                "seeded demo order line"
            );
        }
        orders.insert(Order::new(order_id, Utc::now(), lines));
    }
}
