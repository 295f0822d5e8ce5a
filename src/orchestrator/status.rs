//! Read-only views returned by the orchestrator facade.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::consumer::RegistrationStatus;
use crate::ledger::ErrorSnapshot;
use crate::pods::{PodRecord, PodRole};
use crate::provider::BillingRecord;

/// What is known about one role's pod right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleStatus {
    pub role: PodRole,
    /// `None` when no pod exists or the lookup failed.
    pub pod: Option<PodRecord>,
    /// Public endpoint of a running pod.
    pub endpoint: Option<String>,
    /// Lookup failure, if the provider could not be queried.
    pub lookup_error: Option<String>,
}

impl RoleStatus {
    pub fn is_running(&self) -> bool {
        self.pod.as_ref().is_some_and(PodRecord::is_running)
    }
}

/// Dashboard summary of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub generation: RoleStatus,
    pub orchestration: RoleStatus,
    /// Consumer's view of the endpoint registration (best-effort).
    pub consumer: Option<RegistrationStatus>,
    pub consumer_error: Option<String>,
    pub errors: ErrorSnapshot,
    /// Combined hourly cost of running pods.
    pub estimated_hourly_cost: Decimal,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn role(&self, role: PodRole) -> &RoleStatus {
        match role {
            PodRole::Generation => &self.generation,
            PodRole::Orchestration => &self.orchestration,
        }
    }

    /// True when every remote lookup succeeded.
    pub fn is_complete(&self) -> bool {
        self.generation.lookup_error.is_none()
            && self.orchestration.lookup_error.is_none()
            && self.consumer_error.is_none()
    }
}

/// Consumer diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStateReport {
    /// Body of the consumer's own health endpoint.
    pub health: serde_json::Value,
    pub registration: RegistrationStatus,
    pub state: serde_json::Value,
}

/// Billing records with their sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingSummary {
    pub records: Vec<BillingRecord>,
    pub total: Decimal,
}

impl BillingSummary {
    pub fn from_records(records: Vec<BillingRecord>) -> Self {
        let total = records.iter().map(|r| r.amount).sum();
        Self { records, total }
    }
}
