use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceiling on non-failed top-ups per order, enforced against the action log.
pub const TOPUP_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Topup,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOutcome {
    Success,
    Failed,
}

/// Append-only audit row, written exactly once per top-up or cancel attempt
/// regardless of outcome. Also the basis for top-up count enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub action: ActionType,
    pub transaction_id: String,
    pub data_added_mb: Option<i64>,
    pub days_added: Option<i32>,
    pub price_local: Option<f64>,
    pub price_usd: Option<f64>,
    pub outcome: ActionOutcome,
    /// Opaque provider snapshots taken around the call.
    pub previous_state: serde_json::Value,
    pub new_state: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionLog {
    pub fn new(order_id: Uuid, user_id: &str, action: ActionType, transaction_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id: user_id.to_string(),
            action,
            transaction_id: transaction_id.to_string(),
            data_added_mb: None,
            days_added: None,
            price_local: None,
            price_usd: None,
            outcome: ActionOutcome::Failed,
            previous_state: serde_json::Value::Null,
            new_state: serde_json::Value::Null,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}
