//! Downstream consumer: the service the generation pod's frames feed into.
//!
//! The orchestrator registers the generation pod's public endpoint with the
//! consumer on startup and removes it on shutdown. Connection-refused is
//! reported as [`ConsumerError::NotReachable`] so callers can tell "service
//! down" apart from "service said no".

mod http;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use http::{HttpConsumerClient, HttpHealthProbe};

use crate::error::ConsumerError;

/// What the consumer currently knows about the generation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the consumer's own connection to the endpoint is healthy.
    #[serde(default)]
    pub connected: Option<bool>,
}

/// Endpoint plus the credentials the consumer should present to it.
#[derive(Clone)]
pub struct EndpointRegistration {
    pub url: String,
    pub auth_token: Option<SecretString>,
}

impl std::fmt::Debug for EndpointRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistration")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.is_some())
            .finish()
    }
}

/// Control API of the downstream consumer.
#[async_trait]
pub trait ConsumerApi: Send + Sync {
    async fn register_endpoint(&self, registration: &EndpointRegistration)
    -> Result<(), ConsumerError>;

    /// Remove any registered endpoint. Succeeds if none was registered.
    async fn unregister_endpoint(&self) -> Result<(), ConsumerError>;

    async fn registration_status(&self) -> Result<RegistrationStatus, ConsumerError>;

    async fn health(&self) -> Result<serde_json::Value, ConsumerError>;

    async fn state_info(&self) -> Result<serde_json::Value, ConsumerError>;

    async fn clear_state(&self) -> Result<(), ConsumerError>;

    /// Abort a startup the consumer is currently running.
    async fn abort_startup(&self) -> Result<(), ConsumerError>;
}

/// Single readiness check against a URL.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when the endpoint answered 2xx. `Ok(false)` for "not yet"
    /// (connection refused, non-2xx). `Err` for anything unexpected.
    async fn probe(&self, url: &str) -> Result<bool, ConsumerError>;
}
