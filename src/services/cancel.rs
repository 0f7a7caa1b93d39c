use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{derive, ActionLog, ActionOutcome, ActionType, OrderStatus};
use crate::services::provider::{new_transaction_id, ProvisioningApi};
use crate::services::store::OrderStore;

/// Emitted once per successful cancellation. Refund execution itself is an
/// external billing concern; this event is the hand-off.
#[derive(Debug, Clone)]
pub struct RefundEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub price_local: f64,
    pub price_usd: f64,
}

/// Default refund consumer: logs each event and exits once every sender
/// is dropped. A billing integration attaches its own consumer instead.
pub async fn log_refunds(mut rx: mpsc::Receiver<RefundEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            order_id = %event.order_id,
            user_id = %event.user_id,
            price_usd = event.price_usd,
            "refund due for cancelled order"
        );
    }
    info!("refund consumer stopped");
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub refunded: bool,
}

/// Cancels a profile while it is still cancelable, i.e. allocated but
/// never downloaded to a device.
pub struct CancelService {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn ProvisioningApi>,
    refunds: mpsc::Sender<RefundEvent>,
}

impl CancelService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn ProvisioningApi>,
        refunds: mpsc::Sender<RefundEvent>,
    ) -> Self {
        Self {
            store,
            provider,
            refunds,
        }
    }

    pub async fn cancel_order(&self, order_id: Uuid, user_id: &str) -> EngineResult<CancelOutcome> {
        let mut order = self
            .store
            .find_order(order_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        // Eligibility is evaluated at this instant, from the same matrix
        // the display layer uses.
        let derived = derive(order.esim_status.as_ref(), order.smdp_status.as_ref());
        if !derived.cancelable {
            return Err(EngineError::State(format!(
                "order {} is not cancelable (esim: {:?}, smdp: {:?})",
                order.id, order.esim_status, order.smdp_status
            )));
        }

        let transaction_id = new_transaction_id();
        let previous_state = json!({
            "orderStatus": order.order_status,
            "esimStatus": order.esim_status,
            "smdpStatus": order.smdp_status,
        });

        // Profile-level cancel when we hold a profile identifier,
        // order-level otherwise.
        let result = match &order.esim_tran_no {
            Some(tran_no) => self.provider.cancel_profile(tran_no).await,
            None => self.provider.cancel_order(&order.order_no).await,
        };

        let mut log = ActionLog::new(order.id, user_id, ActionType::Cancel, &transaction_id);
        log.price_local = Some(order.price_local);
        log.price_usd = Some(order.price_usd);
        log.previous_state = previous_state;

        if let Err(e) = result {
            log.error_message = Some(e.to_string());
            self.store.record_action(&log).await?;
            // Provider said no: the order is left untouched.
            return Err(e);
        }

        order.transition(OrderStatus::Cancelled)?;
        self.store.update_order(&order).await?;
        log.outcome = ActionOutcome::Success;
        log.new_state = json!({ "orderStatus": order.order_status });
        self.store.record_action(&log).await?;

        let event = RefundEvent {
            order_id: order.id,
            user_id: order.user_id.clone(),
            price_local: order.price_local,
            price_usd: order.price_usd,
        };
        if self.refunds.send(event).await.is_err() {
            warn!(order_id = %order.id, "no refund consumer attached; event dropped");
        }

        info!(order_id = %order.id, order_no = %order.order_no, "order cancelled, refund-eligible");
        Ok(CancelOutcome { refunded: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EsimStatus, SmdpStatus};
    use crate::testkit::{FakeProvider, MemoryStore};

    fn service(
        store: &Arc<MemoryStore>,
        provider: &Arc<FakeProvider>,
    ) -> (CancelService, mpsc::Receiver<RefundEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (
            CancelService::new(store.clone() as Arc<dyn OrderStore>, provider.clone() as _, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn released_profile_is_cancelable_and_emits_refund_event() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let order = store.seed_allocated("user-1", "B1001").await;
        let (service, mut rx) = service(&store, &provider);

        let outcome = service.cancel_order(order.id, "user-1").await.unwrap();
        assert!(outcome.refunded);

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.order_status, OrderStatus::Cancelled);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.user_id, "user-1");

        let logs = store.actions_for(order.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ActionType::Cancel);
        assert_eq!(logs[0].outcome, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn refund_logger_drains_events_and_stops_when_senders_drop() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let order = store.seed_allocated("user-1", "B1001").await;
        let (tx, rx) = mpsc::channel(8);
        let consumer = tokio::spawn(log_refunds(rx));
        let service =
            CancelService::new(store.clone() as Arc<dyn OrderStore>, provider.clone() as _, tx);

        service.cancel_order(order.id, "user-1").await.unwrap();
        drop(service);

        // The service held the last sender, so the consumer runs dry.
        tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .expect("refund consumer must stop once the channel closes")
            .unwrap();
    }

    #[tokio::test]
    async fn installed_profile_is_no_longer_cancelable() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let mut order = store.seed_allocated("user-1", "B1001").await;
        // Simulated install on a device.
        order.smdp_status = Some(SmdpStatus::Enabled);
        store.update_order(&order).await.unwrap();
        let (service, _rx) = service(&store, &provider);

        let err = service.cancel_order(order.id, "user-1").await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
        assert_eq!(provider.calls_matching("cancel"), 0);
    }

    #[tokio::test]
    async fn profile_level_cancel_is_preferred_over_order_level() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let order = store.seed_allocated("user-1", "B1001").await;
        let (service, _rx) = service(&store, &provider);

        service.cancel_order(order.id, "user-1").await.unwrap();
        assert_eq!(provider.calls_matching("cancel_profile:"), 1);
        assert_eq!(provider.calls_matching("cancel_order:"), 0);
    }

    #[tokio::test]
    async fn order_level_cancel_when_no_profile_identifier() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let mut order = store.seed_allocated("user-1", "B1001").await;
        order.esim_tran_no = None;
        store.update_order(&order).await.unwrap();
        let (service, _rx) = service(&store, &provider);

        service.cancel_order(order.id, "user-1").await.unwrap();
        assert_eq!(provider.calls_matching("cancel_order:"), 1);
    }

    #[tokio::test]
    async fn provider_failure_leaves_the_order_untouched() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        provider.fail_cancels("already activated");
        let order = store.seed_allocated("user-1", "B1001").await;
        let (service, mut rx) = service(&store, &provider);

        let err = service.cancel_order(order.id, "user-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.order_status, OrderStatus::Allocated);
        assert!(rx.try_recv().is_err(), "no refund event on failure");

        // The failed attempt is still audited.
        let logs = store.actions_for(order.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, ActionOutcome::Failed);
    }

    #[tokio::test]
    async fn pending_order_without_profile_state_is_not_cancelable() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeProvider::default());
        let order = store.seed_pending("user-1", "B1001").await;
        let (service, _rx) = service(&store, &provider);

        let err = service.cancel_order(order.id, "user-1").await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }

    #[tokio::test]
    async fn cancelability_follows_the_derivation_matrix() {
        // Sanity tie-in: the same matrix the display layer uses.
        let d = derive(Some(&EsimStatus::GotResource), Some(&SmdpStatus::Released));
        assert!(d.cancelable);
        let d = derive(Some(&EsimStatus::GotResource), Some(&SmdpStatus::Enabled));
        assert!(!d.cancelable);
    }
}
