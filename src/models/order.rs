use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{EsimStatus, SmdpStatus};

/// Durable provisioning state of an order. Transitions only move forward;
/// see [`OrderStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Allocated,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// Legal edges: PENDING → {PROCESSING →} ALLOCATED | FAILED,
    /// ALLOCATED → CANCELLED. Everything else is rejected.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Allocated)
                | (Pending, Failed)
                | (Processing, Allocated)
                | (Processing, Failed)
                | (Allocated, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Failed | OrderStatus::Cancelled)
    }
}

/// One purchased plan. Created Pending by the order service, mutated only by
/// the reconciler (status fields), the top-up service (expiry) and the
/// cancel service (orderStatus → Cancelled). Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    /// Provider-assigned, unique.
    pub order_no: String,
    /// Client-generated idempotency key, unique and immutable.
    pub transaction_id: String,

    pub package_code: String,
    pub package_name: Option<String>,
    pub country_code: String,
    pub data_amount_mb: i64,
    pub validity_days: i32,
    pub price_local: f64,
    pub price_usd: f64,

    pub order_status: OrderStatus,
    pub esim_status: Option<EsimStatus>,
    pub smdp_status: Option<SmdpStatus>,
    pub iccid: Option<String>,
    pub esim_tran_no: Option<String>,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn transition(&mut self, to: OrderStatus) -> EngineResult<()> {
        if !self.order_status.can_transition(to) {
            return Err(EngineError::State(format!(
                "order {} cannot go {:?} -> {to:?}",
                self.id, self.order_status
            )));
        }
        self.order_status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Already provisioned at the provider? Needed before any top-up.
    pub fn is_provisioned(&self) -> bool {
        self.iccid.is_some() || self.esim_tran_no.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
