use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{derive, DisplayStatus, Order, OrderStatus};
use crate::services::provider::{LiveSnapshot, ProvisioningApi};
use crate::services::store::OrderStore;

/// A persisted order with the provider's live view layered on top for
/// display. The order stays the durable source of `order_status`; the
/// snapshot, when present, is the source of instantaneous profile state.
#[derive(Debug, Clone)]
pub struct OrderView {
    pub order: Order,
    pub live: Option<LiveSnapshot>,
    pub display: DisplayStatus,
    pub show_usage: bool,
    pub cancelable: bool,
}

impl OrderView {
    pub fn assemble(order: Order, live: Option<LiveSnapshot>) -> Self {
        let (esim, smdp) = match &live {
            Some(s) => (s.esim_status.as_ref(), s.smdp_status.as_ref()),
            None => (order.esim_status.as_ref(), order.smdp_status.as_ref()),
        };
        let derived = derive(esim, smdp);
        let display = derived
            .display
            .unwrap_or_else(|| DisplayStatus::from_order_status(order.order_status));
        Self {
            display,
            show_usage: derived.show_usage,
            cancelable: derived.cancelable,
            order,
            live,
        }
    }
}

/// Drives in-flight orders to a terminal provisioning state and serves
/// on-demand status checks. One sweep task per process; transitions are
/// idempotent (forward-only), so duplicate sweeps are harmless.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn ProvisioningApi>,
}

/// Handle to the background sweep task. Dropping every watcher sender
/// stops the task.
pub struct SweepHandle {
    tx: mpsc::Sender<Uuid>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Sender used to hand newly created orders to the sweep.
    pub fn watcher(&self) -> mpsc::Sender<Uuid> {
        self.tx.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrderStore>, provider: Arc<dyn ProvisioningApi>) -> Self {
        Self { store, provider }
    }

    /// Spawns the periodic pending sweep. The pending set is seeded from
    /// the store, then fed through the returned handle; ticks are no-ops
    /// while the set is empty.
    pub fn spawn_sweep(&self, interval: Duration) -> SweepHandle {
        let (tx, mut rx) = mpsc::channel::<Uuid>(64);
        let reconciler = self.clone();
        let task = tokio::spawn(async move {
            let mut pending: HashSet<Uuid> = match reconciler.store.find_pending().await {
                Ok(orders) => orders.iter().map(|o| o.id).collect(),
                Err(e) => {
                    warn!("failed to seed pending set, starting empty: {e}");
                    HashSet::new()
                }
            };
            if !pending.is_empty() {
                info!(count = pending.len(), "resuming reconciliation of pending orders");
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    maybe_id = rx.recv() => match maybe_id {
                        Some(id) => {
                            pending.insert(id);
                        }
                        None => break,
                    },
                    _ = ticker.tick(), if !pending.is_empty() => {
                        reconciler.sweep(&mut pending).await;
                    }
                }
            }
            info!("reconciliation sweep stopped");
        });
        SweepHandle { tx, task }
    }

    /// One pass over the pending set. A failure for one order is logged
    /// and never blocks the others; the order stays in the set for the
    /// next cycle ("no new information").
    pub async fn sweep(&self, pending: &mut HashSet<Uuid>) {
        let ids: Vec<Uuid> = pending.iter().copied().collect();
        for id in ids {
            match self.check_one(id).await {
                Ok(still_pending) => {
                    if !still_pending {
                        pending.remove(&id);
                    }
                }
                Err(e) => {
                    warn!(order_id = %id, "reconciliation attempt failed: {e}");
                }
            }
        }
    }

    /// Queries the provider for one in-flight order and applies whatever
    /// forward transition the answer justifies. Returns whether the order
    /// still needs polling. Allocated and terminal orders are left alone.
    async fn check_one(&self, order_id: Uuid) -> EngineResult<bool> {
        let Some(mut order) = self.store.find_by_id(order_id).await? else {
            warn!(%order_id, "pending order vanished from the store");
            return Ok(false);
        };
        if !matches!(
            order.order_status,
            OrderStatus::Pending | OrderStatus::Processing
        ) {
            return Ok(false);
        }

        let snapshots = self.provider.query_profiles(&order.order_no).await?;
        if snapshots.is_empty() {
            // The provider has not surfaced the order at all yet. No new
            // information, so the order keeps its current status.
            return Ok(true);
        }
        match snapshots.into_iter().find(|s| s.iccid.is_some()) {
            Some(snapshot) => {
                apply_allocation(&mut order, &snapshot)?;
                self.store.update_order(&order).await?;
                info!(
                    order_id = %order.id,
                    order_no = %order.order_no,
                    iccid = snapshot.iccid.as_deref().unwrap_or("-"),
                    "order allocated"
                );
                Ok(false)
            }
            None => {
                // The provider knows the order but has not allocated yet.
                if order.order_status == OrderStatus::Pending {
                    order.transition(OrderStatus::Processing)?;
                    self.store.update_order(&order).await?;
                }
                Ok(true)
            }
        }
    }

    /// On-demand status check for one order, ownership-scoped. In-flight
    /// orders get a reconciliation attempt first; allocated orders get a
    /// read-only live overlay. A provider failure degrades to the
    /// last-persisted values instead of failing the caller.
    pub async fn check_order(&self, order_id: Uuid, user_id: &str) -> EngineResult<OrderView> {
        let order = self
            .store
            .find_order(order_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        match order.order_status {
            OrderStatus::Pending | OrderStatus::Processing => {
                if let Err(e) = self.check_one(order.id).await {
                    warn!(%order_id, "on-demand reconciliation failed: {e}");
                }
                let order = self
                    .store
                    .find_order(order_id, user_id)
                    .await?
                    .ok_or(EngineError::NotFound)?;
                Ok(OrderView::assemble(order, None))
            }
            OrderStatus::Allocated => match self.provider.query_profiles(&order.order_no).await {
                Ok(snapshots) => {
                    let live = snapshots.into_iter().next();
                    Ok(OrderView::assemble(order, live))
                }
                Err(e) => {
                    warn!(%order_id, "live snapshot unavailable, showing persisted state: {e}");
                    Ok(OrderView::assemble(order, None))
                }
            },
            OrderStatus::Failed | OrderStatus::Cancelled => Ok(OrderView::assemble(order, None)),
        }
    }
}

/// Copies the allocation fields from a snapshot and moves the order to
/// Allocated. Only the reconciler writes these fields.
fn apply_allocation(order: &mut Order, snapshot: &LiveSnapshot) -> EngineResult<()> {
    order.esim_status = snapshot.esim_status.clone();
    order.smdp_status = snapshot.smdp_status.clone();
    order.iccid = snapshot.iccid.clone();
    order.esim_tran_no = snapshot.esim_tran_no.clone();
    order.qr_code_url = snapshot.qr_code_url.clone();
    order.activation_code = snapshot.activation_code.clone();
    order.expiry_date = snapshot.expired_time;
    order.transition(OrderStatus::Allocated)
}
