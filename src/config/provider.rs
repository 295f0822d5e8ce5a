use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_secs_env};
use crate::error::ConfigError;

pub const DEFAULT_API_BASE: &str = "https://rest.runpod.io/v1";

/// Connection settings for the GPU rental API.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API key sent as a bearer token.
    pub api_key: SecretString,
    /// REST base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ProviderConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let api_key = optional_env("RUNPOD_API_KEY")?
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "RUNPOD_API_KEY".to_string(),
                hint: "Create an API key in the provider console and set RUNPOD_API_KEY"
                    .to_string(),
            })?;

        let base_url =
            optional_env("RUNPOD_API_BASE")?.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            key: "RUNPOD_API_BASE".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;

        Ok(Self {
            api_key,
            base_url,
            request_timeout: parse_secs_env("RUNPOD_REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}
