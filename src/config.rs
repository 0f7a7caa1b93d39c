use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Config {
    pub provider_url: String,
    pub provider_api_key: String,
    pub mongodb_uri: String,
    /// Seconds between reconciliation sweeps of pending orders.
    pub poll_interval_secs: u64,
    /// Timeout applied to every provider HTTP call.
    pub request_timeout_secs: u64,
    pub topup_catalog: TopupCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopupCatalog {
    pub plans: Vec<TopupPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopupPlan {
    pub package_code: String,
    pub name: String,
    /// Empty string means the plan applies in every region.
    #[serde(default)]
    pub country_code: String,
    pub data_amount_mb: i64,
    pub validity_days: i32,
    pub price_local: f64,
    pub price_usd: f64,
    pub enabled: bool,
}

impl Default for TopupCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                TopupPlan {
                    package_code: "EU-7D-1GB-TOPUP".to_string(),
                    name: "Europe +1GB / 7 days".to_string(),
                    country_code: "EU".to_string(),
                    data_amount_mb: 1024,
                    validity_days: 7,
                    price_local: 4.50,
                    price_usd: 4.50,
                    enabled: true,
                },
                TopupPlan {
                    package_code: "GLOBAL-30D-3GB-TOPUP".to_string(),
                    name: "Global +3GB / 30 days".to_string(),
                    country_code: String::new(),
                    data_amount_mb: 3072,
                    validity_days: 30,
                    price_local: 12.00,
                    price_usd: 12.00,
                    enabled: true,
                },
            ],
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let topup_catalog = Self::load_topup_catalog()?;

        Ok(Config {
            provider_url: env::var("PROVIDER_URL").context("PROVIDER_URL not set")?,
            provider_api_key: env::var("PROVIDER_API_KEY").context("PROVIDER_API_KEY not set")?,
            mongodb_uri: env::var("MONGODB_URI").context("MONGODB_URI not set")?,
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid POLL_INTERVAL_SECS")?,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid REQUEST_TIMEOUT_SECS")?,
            topup_catalog,
        })
    }

    fn load_topup_catalog() -> Result<TopupCatalog> {
        let catalog_path =
            env::var("TOPUP_PLANS_PATH").unwrap_or_else(|_| "topup_plans.json".to_string());

        if Path::new(&catalog_path).exists() {
            let content = fs::read_to_string(&catalog_path)
                .context("Failed to read top-up catalog file")?;
            Ok(TopupCatalog::parse(&content)?)
        } else {
            // Create default catalog file
            let default_catalog = TopupCatalog::default();
            let json = serde_json::to_string_pretty(&default_catalog)
                .context("Failed to serialize default top-up catalog")?;
            fs::write(&catalog_path, json).context("Failed to write default top-up catalog")?;
            Ok(default_catalog)
        }
    }
}

impl TopupCatalog {
    /// Parses a JSON catalog. A malformed catalog is a config error, not
    /// a serialization detail leaked to the caller.
    pub fn parse(content: &str) -> EngineResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| EngineError::Config(format!("invalid top-up catalog: {e}")))
    }

    /// Enabled plans valid for a given region; a plan with an empty
    /// country code is offered everywhere.
    pub fn plans_for(&self, country_code: &str) -> Vec<TopupPlan> {
        self.plans
            .iter()
            .filter(|p| p.enabled && (p.country_code.is_empty() || p.country_code == country_code))
            .cloned()
            .collect()
    }

    pub fn find(&self, package_code: &str) -> Option<&TopupPlan> {
        self.plans
            .iter()
            .find(|p| p.enabled && p.package_code == package_code)
    }
}
