//! Template registry: the desired shape of each role's pod.
//!
//! Built once from [`PodsConfig`] when the orchestrator is constructed and
//! never mutated afterwards.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{CredentialMode, PodsConfig, RoleTemplateConfig};
use crate::pods::PodRole;
use crate::provider::CreatePodRequest;

/// Env var names used for bootstrap-mode injection.
pub const BOOTSTRAP_URL_VAR: &str = "BOOTSTRAP_URL";
pub const BOOTSTRAP_TOKEN_VAR: &str = "BOOTSTRAP_TOKEN";
/// Env var the generation pod reads its client token from.
pub const AUTH_TOKEN_VAR: &str = "AUTH_TOKEN";
pub const POD_ROLE_VAR: &str = "PODWARDEN_ROLE";

/// How secret values reach the pod.
#[derive(Clone)]
pub enum EnvInjection {
    /// Secrets are written into the pod env as-is.
    Direct { secrets: Vec<(String, SecretString)> },
    /// Only a bootstrap URL and token are injected; the pod fetches the rest.
    Bootstrap { url: String, token: SecretString },
}

impl std::fmt::Debug for EnvInjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct { secrets } => f
                .debug_struct("Direct")
                .field(
                    "secrets",
                    &secrets.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                )
                .finish(),
            Self::Bootstrap { url, .. } => f
                .debug_struct("Bootstrap")
                .field("url", url)
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Desired pod for one role.
#[derive(Debug, Clone)]
pub struct PodTemplate {
    pub role: PodRole,
    pub name_prefix: String,
    pub image: String,
    pub gpu_type_ids: Vec<String>,
    pub gpu_count: u32,
    pub container_disk_gb: u32,
    pub volume_gb: u32,
    pub volume_mount_path: String,
    pub service_port: u16,
    pub extra_ports: Vec<String>,
    pub health_path: String,
    pub env: BTreeMap<String, String>,
    pub injection: EnvInjection,
    pub estimated_hourly_cost: Decimal,
    pub data_center_ids: Vec<String>,
    pub cloud_type: String,
    endpoint_pattern: String,
}

impl PodTemplate {
    fn from_config(
        role: PodRole,
        cfg: &RoleTemplateConfig,
        pods: &PodsConfig,
        injection: EnvInjection,
    ) -> Self {
        Self {
            role,
            name_prefix: cfg.name_prefix.clone(),
            image: cfg.image.clone(),
            gpu_type_ids: cfg.gpu_type_ids.clone(),
            gpu_count: cfg.gpu_count,
            container_disk_gb: cfg.container_disk_gb,
            volume_gb: cfg.volume_gb,
            volume_mount_path: cfg.volume_mount_path.clone(),
            service_port: cfg.service_port,
            extra_ports: cfg.extra_ports.clone(),
            health_path: cfg.health_path.clone(),
            env: cfg.env.clone(),
            injection,
            estimated_hourly_cost: cfg.estimated_hourly_cost,
            data_center_ids: pods.data_center_ids.clone(),
            cloud_type: pods.cloud_type.clone(),
            endpoint_pattern: pods.endpoint_pattern.clone(),
        }
    }

    /// Name for a newly created pod: prefix plus a UTC timestamp.
    pub fn pod_name(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        format!("{}-{}", self.name_prefix, now.format("%Y%m%d-%H%M%S"))
    }

    /// Public URL of a pod's service port.
    ///
    /// The provider's proxy hostname is a pure function of the pod id, so
    /// this never needs to wait for the pod to announce itself.
    pub fn endpoint_url(&self, pod_id: &str) -> String {
        self.endpoint_pattern
            .replace("{pod_id}", pod_id)
            .replace("{port}", &self.service_port.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn health_url(&self, pod_id: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint_url(pod_id),
            self.health_path.trim_start_matches('/')
        )
    }

    /// Build the provider request for a new pod of this role.
    ///
    /// `overrides` are applied last and win over both plain env and
    /// injected secrets.
    pub fn create_request(
        &self,
        name: String,
        overrides: &[(String, SecretString)],
    ) -> CreatePodRequest {
        let mut env = self.env.clone();
        env.insert(POD_ROLE_VAR.to_string(), self.role.to_string());

        match &self.injection {
            EnvInjection::Direct { secrets } => {
                for (k, v) in secrets {
                    env.insert(k.clone(), v.expose_secret().to_string());
                }
            }
            EnvInjection::Bootstrap { url, token } => {
                env.insert(BOOTSTRAP_URL_VAR.to_string(), url.clone());
                env.insert(
                    BOOTSTRAP_TOKEN_VAR.to_string(),
                    token.expose_secret().to_string(),
                );
            }
        }

        for (k, v) in overrides {
            env.insert(k.clone(), v.expose_secret().to_string());
        }

        let primary = format!("{}/http", self.service_port);
        let mut ports = vec![primary.clone()];
        ports.extend(self.extra_ports.iter().filter(|p| **p != primary).cloned());

        CreatePodRequest {
            name,
            image_name: self.image.clone(),
            gpu_type_ids: self.gpu_type_ids.clone(),
            gpu_count: self.gpu_count,
            container_disk_in_gb: self.container_disk_gb,
            volume_in_gb: self.volume_gb,
            volume_mount_path: self.volume_mount_path.clone(),
            ports,
            env,
            data_center_ids: self.data_center_ids.clone(),
            cloud_type: self.cloud_type.clone(),
        }
    }
}

/// Templates for both roles.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    generation: PodTemplate,
    orchestration: PodTemplate,
    endpoint_token: Option<SecretString>,
}

impl TemplateRegistry {
    pub fn from_config(pods: &PodsConfig) -> Self {
        let injection_for = |role: PodRole| match pods.credential_mode {
            CredentialMode::Direct => {
                let mut secrets = pods.forward_secrets.clone();
                if role == PodRole::Generation
                    && let Some(ref token) = pods.endpoint_token
                {
                    secrets.push((AUTH_TOKEN_VAR.to_string(), token.clone()));
                }
                EnvInjection::Direct { secrets }
            }
            // Config resolution guarantees both are present in bootstrap mode.
            CredentialMode::Bootstrap => EnvInjection::Bootstrap {
                url: pods.bootstrap_url.clone().unwrap_or_default(),
                token: pods
                    .bootstrap_token
                    .clone()
                    .unwrap_or_else(|| SecretString::from(String::new())),
            },
        };

        Self {
            generation: PodTemplate::from_config(
                PodRole::Generation,
                &pods.generation,
                pods,
                injection_for(PodRole::Generation),
            ),
            orchestration: PodTemplate::from_config(
                PodRole::Orchestration,
                &pods.orchestration,
                pods,
                injection_for(PodRole::Orchestration),
            ),
            endpoint_token: pods.endpoint_token.clone(),
        }
    }

    pub fn get(&self, role: PodRole) -> &PodTemplate {
        match role {
            PodRole::Generation => &self.generation,
            PodRole::Orchestration => &self.orchestration,
        }
    }

    /// Credentials handed to the consumer alongside the generation endpoint.
    pub fn endpoint_token(&self) -> Option<&SecretString> {
        self.endpoint_token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn registry(pods: PodsConfig) -> TemplateRegistry {
        TemplateRegistry::from_config(&pods)
    }

    #[test]
    fn endpoint_is_derived_from_pod_id() {
        let reg = registry(PodsConfig::default());
        let template = reg.get(PodRole::Generation);
        assert_eq!(
            template.endpoint_url("x7k2p9"),
            "https://x7k2p9-8000.proxy.runpod.net"
        );
        assert_eq!(
            template.health_url("x7k2p9"),
            "https://x7k2p9-8000.proxy.runpod.net/health"
        );
    }

    #[test]
    fn pod_name_uses_prefix_and_timestamp() {
        let reg = registry(PodsConfig::default());
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let name = reg.get(PodRole::Orchestration).pod_name(now);
        assert_eq!(name, "dreams-orch-20260304-050607");
    }

    #[test]
    fn direct_mode_injects_secrets_and_overrides_win() {
        let pods = PodsConfig {
            forward_secrets: vec![
                ("HF_TOKEN".to_string(), SecretString::from("hf_1".to_string())),
                ("S3_KEY".to_string(), SecretString::from("s3".to_string())),
            ],
            endpoint_token: Some(SecretString::from("tok".to_string())),
            ..Default::default()
        };
        let reg = registry(pods);

        let req = reg.get(PodRole::Generation).create_request(
            "dreams-gen-1".to_string(),
            &[("HF_TOKEN".to_string(), SecretString::from("hf_2".to_string()))],
        );
        assert_eq!(req.env.get("HF_TOKEN").map(String::as_str), Some("hf_2"));
        assert_eq!(req.env.get("S3_KEY").map(String::as_str), Some("s3"));
        assert_eq!(req.env.get(AUTH_TOKEN_VAR).map(String::as_str), Some("tok"));
        assert_eq!(req.env.get(POD_ROLE_VAR).map(String::as_str), Some("generation"));
        assert_eq!(req.ports[0], "8000/http");

        // Only the generation pod serves clients.
        let orch = reg
            .get(PodRole::Orchestration)
            .create_request("dreams-orch-1".to_string(), &[]);
        assert!(!orch.env.contains_key(AUTH_TOKEN_VAR));
    }

    #[test]
    fn bootstrap_mode_injects_only_bootstrap_vars() {
        let pods = PodsConfig {
            credential_mode: CredentialMode::Bootstrap,
            bootstrap_url: Some("https://vault.example.com/b".to_string()),
            bootstrap_token: Some(SecretString::from("bt".to_string())),
            forward_secrets: vec![("HF_TOKEN".to_string(), SecretString::from("x".to_string()))],
            ..Default::default()
        };
        let reg = registry(pods);
        let req = reg
            .get(PodRole::Generation)
            .create_request("dreams-gen-1".to_string(), &[]);

        assert_eq!(
            req.env.get(BOOTSTRAP_URL_VAR).map(String::as_str),
            Some("https://vault.example.com/b")
        );
        assert_eq!(req.env.get(BOOTSTRAP_TOKEN_VAR).map(String::as_str), Some("bt"));
        assert!(!req.env.contains_key("HF_TOKEN"));
    }

    #[test]
    fn request_debug_hides_env_values() {
        let pods = PodsConfig {
            forward_secrets: vec![(
                "HF_TOKEN".to_string(),
                SecretString::from("hf_very_secret".to_string()),
            )],
            ..Default::default()
        };
        let reg = registry(pods);
        let req = reg
            .get(PodRole::Generation)
            .create_request("dreams-gen-1".to_string(), &[]);
        let debug = format!("{:?}", req);
        assert!(debug.contains("HF_TOKEN"));
        assert!(!debug.contains("hf_very_secret"));
    }
}
