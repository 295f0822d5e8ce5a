//! Pod roles and observed pod state.
//!
//! A [`PodRecord`] is a snapshot of what the provider reported at one point
//! in time. Records are never patched in place; a refresh replaces the
//! whole value.

pub mod template;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use template::{EnvInjection, PodTemplate, TemplateRegistry};

/// Which half of the pipeline a pod plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodRole {
    /// Produces frames; exposes an HTTP endpoint the consumer connects to.
    Generation,
    /// Drives the generation pod and feeds the downstream consumer.
    Orchestration,
}

impl PodRole {
    pub const ALL: [PodRole; 2] = [PodRole::Generation, PodRole::Orchestration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Orchestration => "orchestration",
        }
    }
}

impl std::fmt::Display for PodRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PodRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generation" | "gen" => Ok(Self::Generation),
            "orchestration" | "orch" => Ok(Self::Orchestration),
            other => Err(format!(
                "unknown pod role '{other}' (expected 'generation' or 'orchestration')"
            )),
        }
    }
}

/// Desired state the provider reports for a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodStatus {
    Created,
    Running,
    Stopped,
    Terminated,
    Unknown,
}

impl PodStatus {
    /// Parse the provider's status string. Unrecognised values map to `Unknown`.
    pub fn from_provider(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "EXITED" | "STOPPED" | "PAUSED" => Self::Stopped,
            "CREATED" | "PENDING" | "STARTING" => Self::Created,
            "TERMINATED" | "DELETED" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// GPU assigned to a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub type_id: String,
    pub display_name: Option<String>,
    pub count: u32,
}

/// Network reachability of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub public_ip: Option<String>,
    /// Internal port -> public port.
    pub port_mappings: BTreeMap<u16, u16>,
}

/// Observed state of one remote pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub id: String,
    pub name: String,
    pub status: PodStatus,
    pub uptime_secs: u64,
    pub gpu: Option<GpuInfo>,
    pub network: NetworkInfo,
    pub image: Option<String>,
    pub cost_per_hr: Option<Decimal>,
}

impl PodRecord {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Whether this pod belongs to the role identified by `prefix`.
    ///
    /// Terminated pods never match; the provider may list them briefly
    /// after deletion.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.status != PodStatus::Terminated && self.name.starts_with(prefix)
    }

    /// Same pod, with a new desired state.
    pub fn with_status(&self, status: PodStatus) -> Self {
        Self {
            status,
            uptime_secs: if status.is_running() {
                self.uptime_secs
            } else {
                0
            },
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: PodStatus) -> PodRecord {
        PodRecord {
            id: "abc123".to_string(),
            name: name.to_string(),
            status,
            uptime_secs: 42,
            gpu: None,
            network: NetworkInfo::default(),
            image: None,
            cost_per_hr: None,
        }
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in PodRole::ALL {
            assert_eq!(role.as_str().parse::<PodRole>().unwrap(), role);
        }
        assert_eq!("gen".parse::<PodRole>().unwrap(), PodRole::Generation);
        assert!("gpu".parse::<PodRole>().is_err());
    }

    #[test]
    fn provider_status_strings() {
        assert_eq!(PodStatus::from_provider("RUNNING"), PodStatus::Running);
        assert_eq!(PodStatus::from_provider("EXITED"), PodStatus::Stopped);
        assert_eq!(PodStatus::from_provider("created"), PodStatus::Created);
        assert_eq!(PodStatus::from_provider("TERMINATED"), PodStatus::Terminated);
        assert_eq!(PodStatus::from_provider("MIGRATING"), PodStatus::Unknown);
    }

    #[test]
    fn prefix_match_skips_terminated() {
        assert!(record("dreams-gen-20260101", PodStatus::Stopped).matches_prefix("dreams-gen"));
        assert!(!record("dreams-gen-20260101", PodStatus::Terminated).matches_prefix("dreams-gen"));
        assert!(!record("dreams-orch-1", PodStatus::Running).matches_prefix("dreams-gen"));
    }

    #[test]
    fn with_status_resets_uptime_when_not_running() {
        let pod = record("dreams-gen-1", PodStatus::Running);
        assert_eq!(pod.with_status(PodStatus::Stopped).uptime_secs, 0);
        assert_eq!(pod.with_status(PodStatus::Running).uptime_secs, 42);
    }
}
