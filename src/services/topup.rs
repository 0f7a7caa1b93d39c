use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TopupCatalog;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ActionLog, ActionOutcome, ActionType, Order, TOPUP_LIMIT};
use crate::services::provider::{new_transaction_id, ProvisioningApi, TopupTarget};
use crate::services::store::OrderStore;

#[derive(Debug, Clone)]
pub struct TopupOutcome {
    pub transaction_id: String,
    pub iccid: Option<String>,
    pub expired_time: Option<DateTime<Utc>>,
    pub total_volume: Option<i64>,
    pub total_duration_days: i32,
}

/// Adds data/validity to an already-provisioned profile. Every attempt
/// leaves exactly one audit row, written before the outcome is returned.
pub struct TopupService {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn ProvisioningApi>,
    catalog: TopupCatalog,
}

impl TopupService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn ProvisioningApi>,
        catalog: TopupCatalog,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
        }
    }

    pub async fn process_topup(
        &self,
        order_id: Uuid,
        user_id: &str,
        package_code: &str,
    ) -> EngineResult<TopupOutcome> {
        let mut order = self
            .store
            .find_order(order_id, user_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        if !order.is_provisioned() {
            return Err(EngineError::State(
                "order has no provisioned profile to top up".into(),
            ));
        }

        let used = self.store.count_topups(order.id).await?;
        if used >= TOPUP_LIMIT {
            return Err(EngineError::LimitExceeded { used });
        }

        let plan = self
            .catalog
            .find(package_code)
            .ok_or_else(|| EngineError::Validation(format!("unknown top-up package {package_code}")))?
            .clone();

        // Fresh idempotency key for this attempt; a retry gets its own.
        let transaction_id = new_transaction_id();
        let previous_state = self.snapshot_before(&order).await;
        let target = topup_target(&order);

        let result = self
            .provider
            .topup(&target, &plan.package_code, &transaction_id)
            .await;

        let mut log = ActionLog::new(order.id, user_id, ActionType::Topup, &transaction_id);
        log.data_added_mb = Some(plan.data_amount_mb);
        log.days_added = Some(plan.validity_days);
        log.price_local = Some(plan.price_local);
        log.price_usd = Some(plan.price_usd);
        log.previous_state = previous_state;
        match &result {
            Ok(receipt) => {
                log.outcome = ActionOutcome::Success;
                log.new_state = serde_json::to_value(receipt).unwrap_or(serde_json::Value::Null);
            }
            Err(e) => {
                log.outcome = ActionOutcome::Failed;
                log.error_message = Some(e.to_string());
            }
        }
        // Audit before acknowledge: the row lands even when the provider
        // said no.
        self.store.record_action(&log).await?;

        let receipt = result?;
        // Total validity covers the base plan plus every top-up that
        // stuck, the one just applied included.
        let days_added: i32 = self
            .store
            .actions_for(order.id)
            .await?
            .iter()
            .filter(|row| row.action == ActionType::Topup && row.outcome != ActionOutcome::Failed)
            .filter_map(|row| row.days_added)
            .sum();
        if let Some(expired) = receipt.expired_time {
            order.expiry_date = Some(expired);
            order.touch();
            self.store.update_order(&order).await?;
        }

        info!(
            order_id = %order.id,
            transaction_id = %transaction_id,
            package = %plan.package_code,
            "top-up applied"
        );
        Ok(TopupOutcome {
            transaction_id,
            iccid: receipt.iccid.or(order.iccid),
            expired_time: receipt.expired_time.or(order.expiry_date),
            total_volume: receipt.total_volume,
            total_duration_days: order.validity_days + days_added,
        })
    }

    /// Best-effort provider usage snapshot for the audit row; falls back
    /// to the persisted status fields.
    async fn snapshot_before(&self, order: &Order) -> serde_json::Value {
        match self.provider.query_usage(&order.order_no).await {
            Ok(report) => serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
            Err(e) => {
                warn!(order_id = %order.id, "usage snapshot unavailable before top-up: {e}");
                json!({
                    "esimStatus": order.esim_status,
                    "smdpStatus": order.smdp_status,
                    "expiryDate": order.expiry_date,
                })
            }
        }
    }
}

fn topup_target(order: &Order) -> TopupTarget {
    match (&order.esim_tran_no, &order.iccid) {
        (Some(tran_no), _) => TopupTarget::EsimTranNo(tran_no.clone()),
        (None, Some(iccid)) => TopupTarget::Iccid(iccid.clone()),
        // Guarded by is_provisioned() above.
        (None, None) => unreachable!("top-up on unprovisioned order"),
    }
}
