use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database as MongoDatabase, IndexModel};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ActionLog, Order};

/// Persistence seam for orders and their audit trail. Every order read a
/// caller can reach is scoped to the owning user; `find_by_id` exists only
/// for the reconciler, which acts on behalf of the system.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> EngineResult<()>;

    /// Ownership-scoped lookup: an order belonging to someone else is
    /// indistinguishable from a missing one.
    async fn find_order(&self, order_id: Uuid, user_id: &str) -> EngineResult<Option<Order>>;

    /// Unscoped reload for the reconciliation sweep.
    async fn find_by_id(&self, order_id: Uuid) -> EngineResult<Option<Order>>;

    /// All orders still awaiting allocation (Pending or Processing).
    async fn find_pending(&self) -> EngineResult<Vec<Order>>;

    async fn update_order(&self, order: &Order) -> EngineResult<()>;

    /// Append-only; rows are never updated or deleted.
    async fn record_action(&self, log: &ActionLog) -> EngineResult<()>;

    /// Count of non-failed TOPUP rows, the basis for the top-up ceiling.
    async fn count_topups(&self, order_id: Uuid) -> EngineResult<i64>;

    async fn actions_for(&self, order_id: Uuid) -> EngineResult<Vec<ActionLog>>;
}

#[derive(Clone)]
pub struct MongoOrderStore {
    mongo: MongoDatabase,
}

/// Filter value matching however the driver serialized the Uuid field.
fn bson_id(id: Uuid) -> EngineResult<Bson> {
    mongodb::bson::to_bson(&id).map_err(|e| EngineError::Persistence(e.into()))
}

impl MongoOrderStore {
    pub async fn new(config: &Config) -> Result<Self> {
        let client = Client::with_uri_str(&config.mongodb_uri).await?;
        let mongo = client.database("esim_engine");
        Ok(Self { mongo })
    }

    fn orders(&self) -> Collection<Order> {
        self.mongo.collection("orders")
    }

    fn action_logs(&self) -> Collection<ActionLog> {
        self.mongo.collection("order_action_logs")
    }

    /// Unique `order_no`/`transaction_id`, plus the `order_id` index the
    /// top-up count query leans on. Run once at startup.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.orders()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "order_no": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.orders()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "transaction_id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.action_logs()
            .create_index(IndexModel::builder().keys(doc! { "order_id": 1 }).build(), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MongoOrderStore {
    async fn insert_order(&self, order: &Order) -> EngineResult<()> {
        self.orders().insert_one(order, None).await?;
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid, user_id: &str) -> EngineResult<Option<Order>> {
        let order = self
            .orders()
            .find_one(doc! { "id": bson_id(order_id)?, "user_id": user_id }, None)
            .await?;
        Ok(order)
    }

    async fn find_by_id(&self, order_id: Uuid) -> EngineResult<Option<Order>> {
        let order = self
            .orders()
            .find_one(doc! { "id": bson_id(order_id)? }, None)
            .await?;
        Ok(order)
    }

    async fn find_pending(&self) -> EngineResult<Vec<Order>> {
        let cursor = self
            .orders()
            .find(
                doc! { "order_status": { "$in": ["PENDING", "PROCESSING"] } },
                None,
            )
            .await?;
        let orders: Vec<Order> = cursor.try_collect().await?;
        Ok(orders)
    }

    async fn update_order(&self, order: &Order) -> EngineResult<()> {
        self.orders()
            .replace_one(doc! { "id": bson_id(order.id)? }, order, None)
            .await?;
        Ok(())
    }

    async fn record_action(&self, log: &ActionLog) -> EngineResult<()> {
        self.action_logs().insert_one(log, None).await?;
        Ok(())
    }

    async fn count_topups(&self, order_id: Uuid) -> EngineResult<i64> {
        let count = self
            .action_logs()
            .count_documents(
                doc! {
                    "order_id": bson_id(order_id)?,
                    "action": "TOPUP",
                    "outcome": { "$ne": "FAILED" },
                },
                None,
            )
            .await?;
        Ok(count as i64)
    }

    async fn actions_for(&self, order_id: Uuid) -> EngineResult<Vec<ActionLog>> {
        let cursor = self
            .action_logs()
            .find(doc! { "order_id": bson_id(order_id)? }, None)
            .await?;
        let logs: Vec<ActionLog> = cursor.try_collect().await?;
        Ok(logs)
    }
}
