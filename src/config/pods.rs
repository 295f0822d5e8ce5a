use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::helpers::{
    optional_env, parse_env, parse_list_env, parse_pairs_env, parse_optional_env,
};
use crate::error::ConfigError;
use crate::pods::PodRole;

pub const DEFAULT_ENDPOINT_PATTERN: &str = "https://{pod_id}-{port}.proxy.runpod.net";

/// How secrets reach a pod's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Secret values are written into the pod's env at creation.
    #[default]
    Direct,
    /// The pod receives a short-lived token and fetches its secrets on boot.
    Bootstrap,
}

impl std::str::FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "bootstrap" => Ok(Self::Bootstrap),
            other => Err(format!("must be 'direct' or 'bootstrap', got '{other}'")),
        }
    }
}

/// Desired hardware and container for one role.
#[derive(Debug, Clone)]
pub struct RoleTemplateConfig {
    /// Pod names start with this; discovery matches on it.
    pub name_prefix: String,
    pub image: String,
    /// GPU types in order of preference.
    pub gpu_type_ids: Vec<String>,
    pub gpu_count: u32,
    pub container_disk_gb: u32,
    pub volume_gb: u32,
    pub volume_mount_path: String,
    /// Port the service inside the pod listens on.
    pub service_port: u16,
    /// Additional exposed ports, e.g. `22/tcp`.
    pub extra_ports: Vec<String>,
    /// Path polled on the public endpoint until the pod is ready.
    pub health_path: String,
    /// Non-secret environment.
    pub env: BTreeMap<String, String>,
    pub estimated_hourly_cost: Decimal,
}

impl RoleTemplateConfig {
    pub fn default_for(role: PodRole) -> Self {
        match role {
            PodRole::Generation => Self {
                name_prefix: "dreams-gen".to_string(),
                image: "ghcr.io/dreamwell/dream-gen:latest".to_string(),
                gpu_type_ids: vec![
                    "NVIDIA GeForce RTX 4090".to_string(),
                    "NVIDIA RTX A6000".to_string(),
                    "NVIDIA L40S".to_string(),
                ],
                gpu_count: 1,
                container_disk_gb: 50,
                volume_gb: 100,
                volume_mount_path: "/workspace".to_string(),
                service_port: 8000,
                extra_ports: vec!["22/tcp".to_string()],
                health_path: "/health".to_string(),
                env: BTreeMap::new(),
                estimated_hourly_cost: dec!(0.69),
            },
            PodRole::Orchestration => Self {
                name_prefix: "dreams-orch".to_string(),
                image: "ghcr.io/dreamwell/dream-orch:latest".to_string(),
                gpu_type_ids: vec![
                    "NVIDIA RTX A5000".to_string(),
                    "NVIDIA RTX A4000".to_string(),
                ],
                gpu_count: 1,
                container_disk_gb: 30,
                volume_gb: 20,
                volume_mount_path: "/workspace".to_string(),
                service_port: 8080,
                extra_ports: vec!["22/tcp".to_string()],
                health_path: "/health".to_string(),
                env: BTreeMap::new(),
                estimated_hourly_cost: dec!(0.36),
            },
        }
    }

    fn env_prefix(role: PodRole) -> &'static str {
        match role {
            PodRole::Generation => "GEN_POD",
            PodRole::Orchestration => "ORCH_POD",
        }
    }

    fn resolve(role: PodRole, file: &RoleOverrides) -> Result<Self, ConfigError> {
        let mut cfg = Self::default_for(role);
        file.apply(&mut cfg);

        let p = Self::env_prefix(role);
        let key = |name: &str| format!("{p}_{name}");

        if let Some(v) = optional_env(&key("NAME_PREFIX"))? {
            cfg.name_prefix = v;
        }
        if let Some(v) = optional_env(&key("IMAGE"))? {
            cfg.image = v;
        }
        if let Some(v) = parse_list_env(&key("GPU_TYPES"))? {
            cfg.gpu_type_ids = v;
        }
        cfg.gpu_count = parse_optional_env(&key("GPU_COUNT"), cfg.gpu_count)?;
        cfg.container_disk_gb =
            parse_optional_env(&key("CONTAINER_DISK_GB"), cfg.container_disk_gb)?;
        cfg.volume_gb = parse_optional_env(&key("VOLUME_GB"), cfg.volume_gb)?;
        if let Some(v) = optional_env(&key("VOLUME_MOUNT_PATH"))? {
            cfg.volume_mount_path = v;
        }
        cfg.service_port = parse_optional_env(&key("PORT"), cfg.service_port)?;
        if let Some(v) = parse_list_env(&key("EXTRA_PORTS"))? {
            cfg.extra_ports = v;
        }
        if let Some(v) = optional_env(&key("HEALTH_PATH"))? {
            cfg.health_path = v;
        }
        if let Some(pairs) = parse_pairs_env(&key("ENV"))? {
            cfg.env.extend(pairs);
        }
        if let Some(cost) = parse_env::<Decimal>(&key("HOURLY_COST"))? {
            cfg.estimated_hourly_cost = cost;
        }

        cfg.validate(&p)?;
        Ok(cfg)
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        let invalid = |name: &str, message: &str| ConfigError::InvalidValue {
            key: format!("{prefix}_{name}"),
            message: message.to_string(),
        };
        if self.name_prefix.trim().is_empty() {
            return Err(invalid("NAME_PREFIX", "must not be empty"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("IMAGE", "must not be empty"));
        }
        if self.gpu_type_ids.is_empty() {
            return Err(invalid("GPU_TYPES", "at least one GPU type is required"));
        }
        if self.gpu_count == 0 {
            return Err(invalid("GPU_COUNT", "must be at least 1"));
        }
        if self.service_port == 0 {
            return Err(invalid("PORT", "must be a non-zero port"));
        }
        Ok(())
    }
}

/// Template inputs for both roles plus shared placement and secret settings.
#[derive(Clone)]
pub struct PodsConfig {
    pub generation: RoleTemplateConfig,
    pub orchestration: RoleTemplateConfig,
    /// Placement regions in order of preference. Empty means any.
    pub data_center_ids: Vec<String>,
    /// `SECURE` or `COMMUNITY`.
    pub cloud_type: String,
    pub credential_mode: CredentialMode,
    pub bootstrap_url: Option<String>,
    pub bootstrap_token: Option<SecretString>,
    /// Secrets copied into pod env in direct mode: (env name, value).
    pub forward_secrets: Vec<(String, SecretString)>,
    /// Token the generation pod expects from its clients.
    pub endpoint_token: Option<SecretString>,
    /// Public URL pattern with `{pod_id}` and `{port}` placeholders.
    pub endpoint_pattern: String,
}

impl std::fmt::Debug for PodsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret_names: Vec<&str> = self
            .forward_secrets
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        f.debug_struct("PodsConfig")
            .field("generation", &self.generation)
            .field("orchestration", &self.orchestration)
            .field("data_center_ids", &self.data_center_ids)
            .field("cloud_type", &self.cloud_type)
            .field("credential_mode", &self.credential_mode)
            .field("bootstrap_url", &self.bootstrap_url)
            .field("bootstrap_token", &self.bootstrap_token.is_some())
            .field("forward_secrets", &secret_names)
            .field("endpoint_token", &self.endpoint_token.is_some())
            .field("endpoint_pattern", &self.endpoint_pattern)
            .finish()
    }
}

impl Default for PodsConfig {
    fn default() -> Self {
        Self {
            generation: RoleTemplateConfig::default_for(PodRole::Generation),
            orchestration: RoleTemplateConfig::default_for(PodRole::Orchestration),
            data_center_ids: Vec::new(),
            cloud_type: "SECURE".to_string(),
            credential_mode: CredentialMode::Direct,
            bootstrap_url: None,
            bootstrap_token: None,
            forward_secrets: Vec::new(),
            endpoint_token: None,
            endpoint_pattern: DEFAULT_ENDPOINT_PATTERN.to_string(),
        }
    }
}

impl PodsConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let file = match optional_env("PODWARDEN_TEMPLATES")? {
            Some(path) => TemplateFile::load(Path::new(&path))?,
            None => TemplateFile::default(),
        };
        Self::resolve_with(&file)
    }

    pub(crate) fn resolve_with(file: &TemplateFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let credential_mode = parse_optional_env(
            "POD_CREDENTIAL_MODE",
            file.credential_mode.unwrap_or(defaults.credential_mode),
        )?;

        let bootstrap_url = optional_env("POD_BOOTSTRAP_URL")?;
        let bootstrap_token = optional_env("POD_BOOTSTRAP_TOKEN")?.map(SecretString::from);

        let forward_secrets = match credential_mode {
            CredentialMode::Direct => {
                let names = parse_list_env("POD_FORWARD_SECRETS")?
                    .or_else(|| file.forward_secrets.clone())
                    .unwrap_or_default();
                names
                    .into_iter()
                    .map(|name| {
                        optional_env(&name)?
                            .map(|value| (name.clone(), SecretString::from(value)))
                            .ok_or_else(|| ConfigError::MissingRequired {
                                key: name.clone(),
                                hint: "listed in POD_FORWARD_SECRETS but not set".to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            CredentialMode::Bootstrap => {
                if bootstrap_url.is_none() {
                    return Err(ConfigError::MissingRequired {
                        key: "POD_BOOTSTRAP_URL".to_string(),
                        hint: "required when POD_CREDENTIAL_MODE=bootstrap".to_string(),
                    });
                }
                if bootstrap_token.is_none() {
                    return Err(ConfigError::MissingRequired {
                        key: "POD_BOOTSTRAP_TOKEN".to_string(),
                        hint: "required when POD_CREDENTIAL_MODE=bootstrap".to_string(),
                    });
                }
                Vec::new()
            }
        };

        let endpoint_pattern = optional_env("POD_ENDPOINT_PATTERN")?
            .or_else(|| file.endpoint_pattern.clone())
            .unwrap_or(defaults.endpoint_pattern);
        if !endpoint_pattern.contains("{pod_id}") {
            return Err(ConfigError::InvalidValue {
                key: "POD_ENDPOINT_PATTERN".to_string(),
                message: "must contain the {pod_id} placeholder".to_string(),
            });
        }

        Ok(Self {
            generation: RoleTemplateConfig::resolve(PodRole::Generation, &file.generation)?,
            orchestration: RoleTemplateConfig::resolve(
                PodRole::Orchestration,
                &file.orchestration,
            )?,
            data_center_ids: parse_list_env("POD_DATA_CENTERS")?
                .or_else(|| file.data_center_ids.clone())
                .unwrap_or(defaults.data_center_ids),
            cloud_type: optional_env("POD_CLOUD_TYPE")?
                .or_else(|| file.cloud_type.clone())
                .unwrap_or(defaults.cloud_type)
                .to_ascii_uppercase(),
            credential_mode,
            bootstrap_url,
            bootstrap_token,
            forward_secrets,
            endpoint_token: optional_env("GEN_POD_AUTH_TOKEN")?.map(SecretString::from),
            endpoint_pattern,
        })
    }

    pub fn role(&self, role: PodRole) -> &RoleTemplateConfig {
        match role {
            PodRole::Generation => &self.generation,
            PodRole::Orchestration => &self.orchestration,
        }
    }
}

/// Optional TOML file with template overrides.
///
/// ```toml
/// data_center_ids = ["EU-RO-1", "US-KS-2"]
///
/// [generation]
/// image = "ghcr.io/acme/gen:1.4"
/// gpu_type_ids = ["NVIDIA L40S"]
/// hourly_cost = 0.86
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateFile {
    #[serde(default)]
    pub generation: RoleOverrides,
    #[serde(default)]
    pub orchestration: RoleOverrides,
    pub data_center_ids: Option<Vec<String>>,
    pub cloud_type: Option<String>,
    pub credential_mode: Option<CredentialMode>,
    pub forward_secrets: Option<Vec<String>>,
    pub endpoint_pattern: Option<String>,
}

impl TemplateFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::ParseFile {
            path: PathBuf::from(path).display().to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| parse_err(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| parse_err(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleOverrides {
    pub name_prefix: Option<String>,
    pub image: Option<String>,
    pub gpu_type_ids: Option<Vec<String>>,
    pub gpu_count: Option<u32>,
    pub container_disk_gb: Option<u32>,
    pub volume_gb: Option<u32>,
    pub volume_mount_path: Option<String>,
    pub service_port: Option<u16>,
    pub extra_ports: Option<Vec<String>>,
    pub health_path: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub hourly_cost: Option<Decimal>,
}

impl RoleOverrides {
    fn apply(&self, cfg: &mut RoleTemplateConfig) {
        if let Some(ref v) = self.name_prefix {
            cfg.name_prefix = v.clone();
        }
        if let Some(ref v) = self.image {
            cfg.image = v.clone();
        }
        if let Some(ref v) = self.gpu_type_ids {
            cfg.gpu_type_ids = v.clone();
        }
        if let Some(v) = self.gpu_count {
            cfg.gpu_count = v;
        }
        if let Some(v) = self.container_disk_gb {
            cfg.container_disk_gb = v;
        }
        if let Some(v) = self.volume_gb {
            cfg.volume_gb = v;
        }
        if let Some(ref v) = self.volume_mount_path {
            cfg.volume_mount_path = v.clone();
        }
        if let Some(v) = self.service_port {
            cfg.service_port = v;
        }
        if let Some(ref v) = self.extra_ports {
            cfg.extra_ports = v.clone();
        }
        if let Some(ref v) = self.health_path {
            cfg.health_path = v.clone();
        }
        if let Some(ref v) = self.env {
            cfg.env.extend(v.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(v) = self.hourly_cost {
            cfg.estimated_hourly_cost = v;
        }
    }
}
