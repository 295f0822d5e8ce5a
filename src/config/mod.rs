//! Configuration, resolved once at startup from the environment.
//!
//! Precedence for every value: environment variable, then the optional
//! TOML template file (`PODWARDEN_TEMPLATES`), then built-in defaults.
//! Nothing here changes after [`Config::from_env`] returns.

pub(crate) mod helpers;
mod pipeline;
mod pods;
mod provider;

pub use pipeline::{CacheTtls, PipelineConfig};
pub use pods::{
    CredentialMode, DEFAULT_ENDPOINT_PATTERN, PodsConfig, RoleOverrides, RoleTemplateConfig,
    TemplateFile,
};
pub use provider::{DEFAULT_API_BASE, ProviderConfig};

use crate::error::ConfigError;

/// Complete configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub pods: PodsConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            provider: ProviderConfig::resolve()?,
            pods: PodsConfig::resolve()?,
            pipeline: PipelineConfig::resolve()?,
        })
    }
}
