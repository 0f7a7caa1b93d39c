use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{EngineError, EngineResult};
use crate::models::{EsimStatus, SmdpStatus};

/// Provider prices are fixed-point: 10 000 units = 1 USD.
pub const PRICE_UNITS_PER_USD: f64 = 10_000.0;

pub fn price_units(price_usd: f64) -> i64 {
    (price_usd * PRICE_UNITS_PER_USD).round() as i64
}

/// Fresh idempotency key for one provider call attempt: UTC second prefix
/// plus a random suffix. A retry of the same logical action gets a new one.
pub fn new_transaction_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

/// The provider's instantaneous view of one profile. Ephemeral: merged over
/// the persisted order for display, never stored wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    #[serde(default)]
    pub esim_status: Option<EsimStatus>,
    #[serde(default)]
    pub smdp_status: Option<SmdpStatus>,
    #[serde(default)]
    pub total_volume: Option<i64>,
    #[serde(default, rename = "orderUsage")]
    pub used_volume: Option<i64>,
    #[serde(default)]
    pub expired_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub esim_tran_no: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default, rename = "ac")]
    pub activation_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    #[serde(default)]
    pub total_volume: Option<i64>,
    #[serde(default, rename = "orderUsage")]
    pub used_volume: Option<i64>,
    #[serde(default)]
    pub expired_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupReceipt {
    pub transaction_id: String,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub expired_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_volume: Option<i64>,
    #[serde(default)]
    pub topup_volume: Option<i64>,
    #[serde(default, rename = "orderUsage")]
    pub used_volume: Option<i64>,
}

/// Which identifier a top-up is addressed to; profile-level when available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopupTarget {
    EsimTranNo(String),
    Iccid(String),
}

/// Seam over the provisioning provider. Request/response mapping only —
/// no business logic, no automatic retries; retrying is a caller decision.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Returns the provider-assigned order number.
    async fn create_order(
        &self,
        transaction_id: &str,
        package_code: &str,
        count: u32,
        price_units: i64,
    ) -> EngineResult<String>;

    async fn query_profiles(&self, order_no: &str) -> EngineResult<Vec<LiveSnapshot>>;

    async fn query_usage(&self, order_no: &str) -> EngineResult<UsageReport>;

    async fn topup(
        &self,
        target: &TopupTarget,
        package_code: &str,
        transaction_id: &str,
    ) -> EngineResult<TopupReceipt>;

    async fn cancel_order(&self, order_no: &str) -> EngineResult<()>;

    async fn cancel_profile(&self, esim_tran_no: &str) -> EngineResult<()>;
}

#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
    // No `default` attribute here: that would put a `T: Default` bound on
    // the Deserialize impl, and a missing Option field is None anyway.
    obj: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    transaction_id: &'a str,
    package_info_list: Vec<PackageInfo<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageInfo<'a> {
    package_code: &'a str,
    count: u32,
    price: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderObj {
    order_no: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    order_no: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryObj {
    #[serde(default)]
    esim_list: Vec<LiveSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopupRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    esim_tran_no: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iccid: Option<&'a str>,
    package_code: &'a str,
    transaction_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelProfileRequest<'a> {
    esim_tran_no: &'a str,
}

impl HttpProviderClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.provider_url.clone(),
            api_key: config.provider_api_key.clone(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> EngineResult<ApiEnvelope<T>> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("RT-AccessCode", &self.api_key)
            // Distinct request identifier per call, never reused.
            .header("RT-RequestID", Uuid::new_v4().to_string())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(Some(status.to_string()), error_text));
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.success {
            return Err(EngineError::provider(
                envelope.error_code,
                envelope
                    .error_msg
                    .unwrap_or_else(|| "provider call failed".to_string()),
            ));
        }
        Ok(envelope)
    }

    async fn post_obj<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> EngineResult<T> {
        let envelope = self.post(path, body).await?;
        envelope
            .obj
            .ok_or_else(|| EngineError::provider(None, "provider response missing obj"))
    }
}

#[async_trait]
impl ProvisioningApi for HttpProviderClient {
    async fn create_order(
        &self,
        transaction_id: &str,
        package_code: &str,
        count: u32,
        price_units: i64,
    ) -> EngineResult<String> {
        let request = OrderRequest {
            transaction_id,
            package_info_list: vec![PackageInfo {
                package_code,
                count,
                price: price_units,
            }],
        };
        let obj: OrderObj = self.post_obj("/esim/order", &request).await?;
        Ok(obj.order_no)
    }

    async fn query_profiles(&self, order_no: &str) -> EngineResult<Vec<LiveSnapshot>> {
        let obj: QueryObj = self.post_obj("/esim/query", &QueryRequest { order_no }).await?;
        Ok(obj.esim_list)
    }

    async fn query_usage(&self, order_no: &str) -> EngineResult<UsageReport> {
        self.post_obj("/esim/usage", &QueryRequest { order_no }).await
    }

    async fn topup(
        &self,
        target: &TopupTarget,
        package_code: &str,
        transaction_id: &str,
    ) -> EngineResult<TopupReceipt> {
        let (esim_tran_no, iccid) = match target {
            TopupTarget::EsimTranNo(n) => (Some(n.as_str()), None),
            TopupTarget::Iccid(i) => (None, Some(i.as_str())),
        };
        let request = TopupRequest {
            esim_tran_no,
            iccid,
            package_code,
            transaction_id,
        };
        self.post_obj("/esim/topup", &request).await
    }

    async fn cancel_order(&self, order_no: &str) -> EngineResult<()> {
        let _: ApiEnvelope<serde_json::Value> =
            self.post("/esim/cancel", &QueryRequest { order_no }).await?;
        Ok(())
    }

    async fn cancel_profile(&self, esim_tran_no: &str) -> EngineResult<()> {
        let _: ApiEnvelope<serde_json::Value> = self
            .post("/esim/profile/cancel", &CancelProfileRequest { esim_tran_no })
            .await?;
        Ok(())
    }
}
