use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env, parse_secs_env};
use crate::error::ConfigError;

/// Sequencing, consumer and cache settings.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Base URL of the downstream consumer service.
    pub consumer_url: String,
    /// Bearer token for the consumer's control API.
    pub consumer_token: Option<SecretString>,
    /// Per-request timeout against the consumer and health endpoints.
    pub consumer_timeout: Duration,
    /// How long to wait for the generation pod to answer its health path.
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
    /// Pause after deleting a pod before asking for a replacement.
    pub recreate_grace: Duration,
    pub generation_max_attempts: u32,
    pub orchestration_max_attempts: u32,
    /// How long start/stop wait for a concurrent run to finish.
    pub lock_timeout: Duration,
    pub cache: CacheTtls,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("consumer_url", &self.consumer_url)
            .field("consumer_token", &self.consumer_token.is_some())
            .field("consumer_timeout", &self.consumer_timeout)
            .field("health_timeout", &self.health_timeout)
            .field("health_poll_interval", &self.health_poll_interval)
            .field("recreate_grace", &self.recreate_grace)
            .field("generation_max_attempts", &self.generation_max_attempts)
            .field("orchestration_max_attempts", &self.orchestration_max_attempts)
            .field("lock_timeout", &self.lock_timeout)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Time-to-live per cached read.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    /// Per-role pod status lookups.
    pub status: Duration,
    /// Pod listing used for discovery.
    pub discovery: Duration,
    /// Aggregated status summary served to dashboards.
    pub summary: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(10),
            discovery: Duration::from_secs(30),
            summary: Duration::from_secs(5),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consumer_url: "http://127.0.0.1:8000".to_string(),
            consumer_token: None,
            consumer_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(180),
            health_poll_interval: Duration::from_secs(5),
            recreate_grace: Duration::from_secs(10),
            generation_max_attempts: 2,
            orchestration_max_attempts: 3,
            lock_timeout: Duration::from_secs(600),
            cache: CacheTtls::default(),
        }
    }
}

impl PipelineConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let consumer_url =
            optional_env("CONSUMER_URL")?.unwrap_or_else(|| defaults.consumer_url.clone());
        url::Url::parse(&consumer_url).map_err(|e| ConfigError::InvalidValue {
            key: "CONSUMER_URL".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;

        let health_poll_interval = parse_secs_env("HEALTH_POLL_INTERVAL_SECS", 5)?;
        if health_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "HEALTH_POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let generation_max_attempts =
            parse_optional_env("GEN_MAX_RECREATE_ATTEMPTS", defaults.generation_max_attempts)?;
        let orchestration_max_attempts = parse_optional_env(
            "ORCH_MAX_RECREATE_ATTEMPTS",
            defaults.orchestration_max_attempts,
        )?;
        for (key, value) in [
            ("GEN_MAX_RECREATE_ATTEMPTS", generation_max_attempts),
            ("ORCH_MAX_RECREATE_ATTEMPTS", orchestration_max_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        Ok(Self {
            consumer_url,
            consumer_token: optional_env("CONSUMER_TOKEN")?.map(SecretString::from),
            consumer_timeout: parse_secs_env("CONSUMER_TIMEOUT_SECS", 10)?,
            health_timeout: parse_secs_env("HEALTH_TIMEOUT_SECS", 180)?,
            health_poll_interval,
            recreate_grace: parse_secs_env("RECREATE_GRACE_SECS", 10)?,
            generation_max_attempts,
            orchestration_max_attempts,
            lock_timeout: parse_secs_env("PIPELINE_LOCK_TIMEOUT_SECS", 600)?,
            cache: CacheTtls {
                status: parse_secs_env("CACHE_STATUS_TTL_SECS", 10)?,
                discovery: parse_secs_env("CACHE_DISCOVERY_TTL_SECS", 30)?,
                summary: parse_secs_env("CACHE_SUMMARY_TTL_SECS", 5)?,
            },
        })
    }
}
