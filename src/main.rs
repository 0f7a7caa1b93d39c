use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use esim_engine::config::Config;
use esim_engine::services::{
    log_refunds, CancelService, HttpProviderClient, MongoOrderStore, OrderStore, ProvisioningApi,
    Reconciler, RefundEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;

    let mongo = MongoOrderStore::new(&config).await?;
    mongo.ensure_indexes().await?;
    let store: Arc<dyn OrderStore> = Arc::new(mongo);
    let provider: Arc<dyn ProvisioningApi> = Arc::new(HttpProviderClient::new(&config)?);

    let reconciler = Reconciler::new(store.clone(), provider.clone());
    let sweep = reconciler.spawn_sweep(Duration::from_secs(config.poll_interval_secs));

    // Cancellations emit refund events; the default consumer logs them
    // until a billing integration takes its place.
    let (refund_tx, refund_rx) = mpsc::channel::<RefundEvent>(64);
    let refund_log = tokio::spawn(log_refunds(refund_rx));
    let cancels = CancelService::new(store, provider, refund_tx);

    info!("esim-engine reconciliation worker started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    sweep.abort();
    // Dropping the service closes the refund channel so the consumer
    // drains and exits.
    drop(cancels);
    refund_log.await?;

    Ok(())
}
