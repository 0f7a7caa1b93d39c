//! In-memory store and scripted provider used across the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{
    ActionLog, ActionOutcome, ActionType, EsimStatus, Order, OrderStatus, SmdpStatus,
};
use crate::services::provider::{
    new_transaction_id, LiveSnapshot, ProvisioningApi, TopupReceipt, TopupTarget, UsageReport,
};
use crate::services::store::OrderStore;

/// A snapshot the provider would return once a profile is allocated.
pub fn allocated_snapshot(iccid: &str) -> LiveSnapshot {
    LiveSnapshot {
        esim_status: Some(EsimStatus::GotResource),
        smdp_status: Some(SmdpStatus::Released),
        total_volume: Some(1 << 30),
        used_volume: Some(0),
        expired_time: Some(Utc::now() + Duration::days(7)),
        iccid: Some(iccid.to_string()),
        esim_tran_no: Some(format!("T-{iccid}")),
        qr_code_url: Some(format!("https://rsp.example.com/qr/{iccid}.png")),
        activation_code: Some(format!("LPA:1$rsp.example.com${iccid}")),
    }
}

/// A pre-built audit row for seeding top-up history.
pub fn topup_log(order: &Order, outcome: ActionOutcome) -> ActionLog {
    let mut log = ActionLog::new(
        order.id,
        &order.user_id,
        ActionType::Topup,
        &new_transaction_id(),
    );
    log.outcome = outcome;
    log.days_added = Some(7);
    log.data_added_mb = Some(1024);
    log
}

#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    logs: Mutex<Vec<ActionLog>>,
    fail_next_insert: Mutex<bool>,
}

fn injected(msg: &str) -> EngineError {
    EngineError::Persistence(mongodb::error::Error::custom(msg.to_string()))
}

impl MemoryStore {
    pub async fn seed_pending(&self, user_id: &str, order_no: &str) -> Order {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            order_no: order_no.to_string(),
            transaction_id: new_transaction_id(),
            package_code: "EU-7D-1GB".to_string(),
            package_name: Some("Europe 7 Days 1GB".to_string()),
            country_code: "EU".to_string(),
            data_amount_mb: 1024,
            validity_days: 7,
            price_local: 4.50,
            price_usd: 4.50,
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
        self.orders.lock().unwrap().insert(order.id, order.clone());
        order
    }

    /// An order the provider has already allocated: profile released but
    /// not yet installed anywhere.
    pub async fn seed_allocated(&self, user_id: &str, order_no: &str) -> Order {
        let mut order = self.seed_pending(user_id, order_no).await;
        order.order_status = OrderStatus::Allocated;
        order.esim_status = Some(EsimStatus::GotResource);
        order.smdp_status = Some(SmdpStatus::Released);
        order.iccid = Some("8943108161511000000".to_string());
        order.esim_tran_no = Some(format!("T-{order_no}"));
        order.expiry_date = Some(Utc::now() + Duration::days(7));
        self.orders.lock().unwrap().insert(order.id, order.clone());
        order
    }

    pub async fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub async fn fail_next_insert(&self) {
        *self.fail_next_insert.lock().unwrap() = true;
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> EngineResult<()> {
        if std::mem::take(&mut *self.fail_next_insert.lock().unwrap()) {
            return Err(injected("injected write failure"));
        }
        let mut orders = self.orders.lock().unwrap();
        // Mirror the unique indexes.
        if orders
            .values()
            .any(|o| o.order_no == order.order_no || o.transaction_id == order.transaction_id)
        {
            return Err(injected("duplicate key"));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid, user_id: &str) -> EngineResult<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned())
    }

    async fn find_by_id(&self, order_id: Uuid) -> EngineResult<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_pending(&self) -> EngineResult<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| {
                matches!(
                    o.order_status,
                    OrderStatus::Pending | OrderStatus::Processing
                )
            })
            .cloned()
            .collect())
    }

    async fn update_order(&self, order: &Order) -> EngineResult<()> {
        self.orders.lock().unwrap().insert(order.id, order.clone());
        Ok(())
    }

    async fn record_action(&self, log: &ActionLog) -> EngineResult<()> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn count_topups(&self, order_id: Uuid) -> EngineResult<i64> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                l.order_id == order_id
                    && l.action == ActionType::Topup
                    && l.outcome != ActionOutcome::Failed
            })
            .count() as i64)
    }

    async fn actions_for(&self, order_id: Uuid) -> EngineResult<Vec<ActionLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }
}

/// Scripted provider double. Unscripted calls succeed with generated
/// defaults; every call is recorded for interaction assertions.
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<String>>,
    create_queue: Mutex<VecDeque<Result<String, String>>>,
    profiles: Mutex<HashMap<String, Result<Vec<LiveSnapshot>, String>>>,
    topup_queue: Mutex<VecDeque<Result<TopupReceipt, String>>>,
    cancel_error: Mutex<Option<String>>,
    counter: AtomicU64,
}

impl FakeProvider {
    pub fn push_create(&self, result: Result<&str, &str>) {
        self.create_queue
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string).map_err(str::to_string));
    }

    pub fn set_profiles(&self, order_no: &str, result: Result<Vec<LiveSnapshot>, &str>) {
        self.profiles
            .lock()
            .unwrap()
            .insert(order_no.to_string(), result.map_err(str::to_string));
    }

    pub fn push_topup(&self, result: Result<TopupReceipt, &str>) {
        self.topup_queue
            .lock()
            .unwrap()
            .push_back(result.map_err(str::to_string));
    }

    pub fn push_topup_receipt(&self, expired_time: chrono::DateTime<Utc>) {
        self.push_topup(Ok(TopupReceipt {
            transaction_id: new_transaction_id(),
            iccid: Some("8943108161511000000".to_string()),
            expired_time: Some(expired_time),
            total_volume: Some(2 << 30),
            topup_volume: Some(1 << 30),
            used_volume: Some(0),
        }));
    }

    pub fn fail_cancels(&self, message: &str) {
        *self.cancel_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn provider_err(message: String) -> EngineError {
        EngineError::provider(Some("500000".to_string()), message)
    }
}

#[async_trait]
impl ProvisioningApi for FakeProvider {
    async fn create_order(
        &self,
        transaction_id: &str,
        _package_code: &str,
        _count: u32,
        _price_units: i64,
    ) -> EngineResult<String> {
        self.record(format!("create:{transaction_id}"));
        match self.create_queue.lock().unwrap().pop_front() {
            Some(Ok(order_no)) => Ok(order_no),
            Some(Err(message)) => Err(Self::provider_err(message)),
            None => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                Ok(format!("B9{n:03}"))
            }
        }
    }

    async fn query_profiles(&self, order_no: &str) -> EngineResult<Vec<LiveSnapshot>> {
        self.record(format!("query:{order_no}"));
        match self.profiles.lock().unwrap().get(order_no) {
            Some(Ok(snapshots)) => Ok(snapshots.clone()),
            Some(Err(message)) => Err(Self::provider_err(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn query_usage(&self, order_no: &str) -> EngineResult<UsageReport> {
        self.record(format!("usage:{order_no}"));
        Ok(UsageReport::default())
    }

    async fn topup(
        &self,
        _target: &TopupTarget,
        _package_code: &str,
        transaction_id: &str,
    ) -> EngineResult<TopupReceipt> {
        self.record(format!("topup:{transaction_id}"));
        match self.topup_queue.lock().unwrap().pop_front() {
            Some(Ok(receipt)) => Ok(receipt),
            Some(Err(message)) => Err(Self::provider_err(message)),
            None => Ok(TopupReceipt {
                transaction_id: transaction_id.to_string(),
                iccid: None,
                expired_time: None,
                total_volume: Some(2 << 30),
                topup_volume: Some(1 << 30),
                used_volume: Some(0),
            }),
        }
    }

    async fn cancel_order(&self, order_no: &str) -> EngineResult<()> {
        self.record(format!("cancel_order:{order_no}"));
        match self.cancel_error.lock().unwrap().clone() {
            Some(message) => Err(Self::provider_err(message)),
            None => Ok(()),
        }
    }

    async fn cancel_profile(&self, esim_tran_no: &str) -> EngineResult<()> {
        self.record(format!("cancel_profile:{esim_tran_no}"));
        match self.cancel_error.lock().unwrap().clone() {
            Some(message) => Err(Self::provider_err(message)),
            None => Ok(()),
        }
    }
}
