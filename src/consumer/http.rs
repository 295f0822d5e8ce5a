use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::consumer::{ConsumerApi, EndpointRegistration, HealthProbe, RegistrationStatus};
use crate::error::ConsumerError;

const REGISTRATION_PATH: &str = "api/gpu/endpoint";
const HEALTH_PATH: &str = "health";
const STATE_PATH: &str = "api/state";
const CLEAR_STATE_PATH: &str = "api/state/clear";
const ABORT_STARTUP_PATH: &str = "api/startup/abort";

/// HTTP client for the consumer's control API.
pub struct HttpConsumerClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpConsumerClient {
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ConsumerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsumerError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.token {
            Some(ref token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<String, ConsumerError> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_send_error(e, &self.url(path)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Consumer {} -> {}", path, status);

        if !status.is_success() {
            return Err(ConsumerError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<serde_json::Value, ConsumerError> {
        let body = self.send(request, path).await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ConsumerError::InvalidResponse(e.to_string()))
    }
}

fn classify_send_error(e: reqwest::Error, url: &str) -> ConsumerError {
    if e.is_connect() {
        ConsumerError::NotReachable {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        ConsumerError::Request(e.to_string())
    }
}

#[async_trait]
impl ConsumerApi for HttpConsumerClient {
    async fn register_endpoint(
        &self,
        registration: &EndpointRegistration,
    ) -> Result<(), ConsumerError> {
        let body = json!({
            "url": registration.url,
            "token": registration.auth_token.as_ref().map(|t| t.expose_secret().to_string()),
        });
        self.send(
            self.request(Method::POST, REGISTRATION_PATH).json(&body),
            REGISTRATION_PATH,
        )
        .await
        .map(|_| ())
    }

    async fn unregister_endpoint(&self) -> Result<(), ConsumerError> {
        match self
            .send(
                self.request(Method::DELETE, REGISTRATION_PATH),
                REGISTRATION_PATH,
            )
            .await
        {
            Ok(_) => Ok(()),
            // Nothing registered.
            Err(ConsumerError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn registration_status(&self) -> Result<RegistrationStatus, ConsumerError> {
        let value = self
            .send_json(
                self.request(Method::GET, REGISTRATION_PATH),
                REGISTRATION_PATH,
            )
            .await?;
        if value.is_null() {
            return Ok(RegistrationStatus::default());
        }
        serde_json::from_value(value).map_err(|e| ConsumerError::InvalidResponse(e.to_string()))
    }

    async fn health(&self) -> Result<serde_json::Value, ConsumerError> {
        self.send_json(self.request(Method::GET, HEALTH_PATH), HEALTH_PATH)
            .await
    }

    async fn state_info(&self) -> Result<serde_json::Value, ConsumerError> {
        self.send_json(self.request(Method::GET, STATE_PATH), STATE_PATH)
            .await
    }

    async fn clear_state(&self) -> Result<(), ConsumerError> {
        self.send(
            self.request(Method::POST, CLEAR_STATE_PATH),
            CLEAR_STATE_PATH,
        )
        .await
        .map(|_| ())
    }

    async fn abort_startup(&self) -> Result<(), ConsumerError> {
        self.send(
            self.request(Method::POST, ABORT_STARTUP_PATH),
            ABORT_STARTUP_PATH,
        )
        .await
        .map(|_| ())
    }
}

/// Plain GET health check.
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, ConsumerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsumerError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<bool, ConsumerError> {
        match self.client.get(url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                // Connection refused and timeouts are expected while the pod boots
                if e.is_connect() || e.is_timeout() {
                    Ok(false)
                } else {
                    Err(ConsumerError::Request(e.to_string()))
                }
            }
        }
    }
}
