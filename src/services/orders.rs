use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{TopupCatalog, TopupPlan};
use crate::errors::{EngineError, EngineResult};
use crate::models::{Order, OrderStatus};
use crate::services::provider::{new_transaction_id, price_units, ProvisioningApi};
use crate::services::reconcile::{OrderView, Reconciler};
use crate::services::store::OrderStore;

/// Caller input for one purchase. Everything except the display name is
/// required.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub package_code: String,
    pub package_name: Option<String>,
    pub country_code: String,
    pub data_amount_mb: i64,
    pub validity_days: i32,
    pub price_local: f64,
    pub price_usd: f64,
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub order_no: String,
    pub transaction_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct TopupPlans {
    pub plans: Vec<TopupPlan>,
    pub topup_count: i64,
}

/// Order-facing API surface: create, check status, list top-up plans.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn ProvisioningApi>,
    catalog: TopupCatalog,
    reconciler: Reconciler,
    watch: mpsc::Sender<Uuid>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn ProvisioningApi>,
        catalog: TopupCatalog,
        reconciler: Reconciler,
        watch: mpsc::Sender<Uuid>,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
            reconciler,
            watch,
        }
    }

    /// Places a provider order and persists it in Pending. No implicit
    /// dedup: calling twice with the same input buys two plans, each with
    /// its own transaction id.
    pub async fn create_order(&self, input: NewOrder) -> EngineResult<CreatedOrder> {
        validate(&input)?;

        let transaction_id = new_transaction_id();
        let order_no = self
            .provider
            .create_order(
                &transaction_id,
                &input.package_code,
                1,
                price_units(input.price_usd),
            )
            .await?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            order_no: order_no.clone(),
            transaction_id: transaction_id.clone(),
            package_code: input.package_code,
            package_name: input.package_name,
            country_code: input.country_code,
            data_amount_mb: input.data_amount_mb,
            validity_days: input.validity_days,
            price_local: input.price_local,
            price_usd: input.price_usd,
            order_status: OrderStatus::Pending,
            esim_status: None,
            smdp_status: None,
            iccid: None,
            esim_tran_no: None,
            qr_code_url: None,
            activation_code: None,
            expiry_date: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert_order(&order).await {
            // The order exists at the provider but not locally; an
            // operator has to reconcile manually using these two ids.
            error!(
                order_no = %order_no,
                transaction_id = %transaction_id,
                "provider order created but local persist failed: {e}"
            );
            return Err(e);
        }

        info!(order_id = %order.id, order_no = %order_no, "order created, awaiting allocation");
        if self.watch.send(order.id).await.is_err() {
            info!(order_id = %order.id, "sweep not running; order will reconcile on demand");
        }

        Ok(CreatedOrder {
            order_id: order.id,
            order_no,
            transaction_id,
            status: OrderStatus::Pending,
        })
    }

    /// Reconcile-then-read for one order; see [`Reconciler::check_order`].
    pub async fn check_order_status(&self, order_id: Uuid, user_id: &str) -> EngineResult<OrderView> {
        self.reconciler.check_order(order_id, user_id).await
    }

    /// Top-up plans applicable to an order's region, with the order's
    /// current non-failed top-up count.
    pub async fn get_topup_plans(&self, order_id: Uuid, user_id: &str) -> EngineResult<TopupPlans> {
        let order = self
            .store
            .find_order(order_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        let topup_count = self.store.count_topups(order.id).await?;
        Ok(TopupPlans {
            plans: self.catalog.plans_for(&order.country_code),
            topup_count,
        })
    }
}

fn validate(input: &NewOrder) -> EngineResult<()> {
    if input.user_id.trim().is_empty() {
        return Err(EngineError::Validation("userId is required".into()));
    }
    if input.package_code.trim().is_empty() {
        return Err(EngineError::Validation("packageCode is required".into()));
    }
    if input.country_code.trim().is_empty() {
        return Err(EngineError::Validation("countryCode is required".into()));
    }
    if input.data_amount_mb <= 0 {
        return Err(EngineError::Validation("dataAmount must be positive".into()));
    }
    if input.validity_days <= 0 {
        return Err(EngineError::Validation("validityDays must be positive".into()));
    }
    Ok(())
}
