//! Resource provider: typed access to the GPU rental API.
//!
//! The [`ResourceProvider`] trait is the only seam between the orchestrator
//! and the vendor. Implementations do not retry; every non-2xx response is
//! returned as a [`ProviderError`] whose `kind` has already been classified.

mod runpod;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use runpod::RunpodProvider;

use crate::error::ProviderError;
use crate::pods::PodRecord;

/// Body of a create-pod call.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodRequest {
    pub name: String,
    pub image_name: String,
    /// GPU types in order of preference.
    pub gpu_type_ids: Vec<String>,
    pub gpu_count: u32,
    pub container_disk_in_gb: u32,
    pub volume_in_gb: u32,
    pub volume_mount_path: String,
    pub ports: Vec<String>,
    /// Full environment, secrets included. Never log the values.
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_center_ids: Vec<String>,
    pub cloud_type: String,
}

impl std::fmt::Debug for CreatePodRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatePodRequest")
            .field("name", &self.name)
            .field("image_name", &self.image_name)
            .field("gpu_type_ids", &self.gpu_type_ids)
            .field("gpu_count", &self.gpu_count)
            .field("container_disk_in_gb", &self.container_disk_in_gb)
            .field("volume_in_gb", &self.volume_in_gb)
            .field("ports", &self.ports)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("data_center_ids", &self.data_center_ids)
            .field("cloud_type", &self.cloud_type)
            .finish()
    }
}

/// Billing bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingBucket {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl BillingBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Which billing records to fetch.
#[derive(Debug, Clone, Default)]
pub struct BillingFilter {
    pub pod_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub bucket: BillingBucket,
}

/// One billing bucket as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingRecord {
    pub time: String,
    pub amount: Decimal,
    #[serde(default)]
    pub time_billed_ms: Option<u64>,
    #[serde(default)]
    pub pod_id: Option<String>,
    #[serde(default)]
    pub gpu_type_id: Option<String>,
}

/// Operations the orchestrator needs from the GPU rental API.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// All pods on the account.
    async fn list_pods(&self) -> Result<Vec<PodRecord>, ProviderError>;

    /// One pod, or `None` if it does not exist.
    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>, ProviderError>;

    async fn create_pod(&self, request: &CreatePodRequest) -> Result<PodRecord, ProviderError>;

    async fn start_pod(&self, id: &str) -> Result<(), ProviderError>;

    async fn stop_pod(&self, id: &str) -> Result<(), ProviderError>;

    async fn delete_pod(&self, id: &str) -> Result<(), ProviderError>;

    async fn billing(&self, filter: &BillingFilter) -> Result<Vec<BillingRecord>, ProviderError>;
}
