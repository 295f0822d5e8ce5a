//! REST client for the RunPod pod API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::pods::{GpuInfo, NetworkInfo, PodRecord, PodStatus};
use crate::provider::{BillingFilter, BillingRecord, CreatePodRequest, ResourceProvider};

const MAX_LOGGED_BODY: usize = 2000;

/// [`ResourceProvider`] over the RunPod REST API.
pub struct RunpodProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl RunpodProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderErrorKind::Network,
                    format!("Failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.client
            .request(method, url)
            .bearer_auth(self.api_key.expose_secret())
            .header("Accept", "application/json")
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(&self, request: RequestBuilder, op: &str) -> Result<String, ProviderError> {
        tracing::debug!("Resource provider request: {}", op);

        let response = request.send().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Network, format!("{op}: {e}"))
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if tracing::enabled!(tracing::Level::DEBUG) {
            let truncated = if body.len() > MAX_LOGGED_BODY {
                let mut end = MAX_LOGGED_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
            } else {
                body.clone()
            };
            tracing::debug!("Resource provider {} -> {}: {}", op, status, truncated);
        }

        if !status.is_success() {
            let err = ProviderError::from_response(status.as_u16(), &body);
            tracing::debug!("Resource provider {} failed: {}", op, err);
            return Err(err);
        }

        Ok(body)
    }

    fn parse<T: for<'de> Deserialize<'de>>(body: &str, op: &str) -> Result<T, ProviderError> {
        serde_json::from_str(body).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::InvalidResponse,
                format!("{op}: unexpected response body: {e}"),
            )
        })
    }
}

#[async_trait]
impl ResourceProvider for RunpodProvider {
    async fn list_pods(&self) -> Result<Vec<PodRecord>, ProviderError> {
        let body = self.send(self.request(Method::GET, "pods"), "list pods").await?;
        let pods: Vec<PodWire> = Self::parse(&body, "list pods")?;
        Ok(pods.into_iter().map(PodWire::into_record).collect())
    }

    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>, ProviderError> {
        let op = format!("get pod {id}");
        match self
            .send(self.request(Method::GET, &format!("pods/{id}")), &op)
            .await
        {
            Ok(body) => {
                let pod: PodWire = Self::parse(&body, &op)?;
                Ok(Some(pod.into_record()))
            }
            Err(e) if e.kind == ProviderErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_pod(&self, request: &CreatePodRequest) -> Result<PodRecord, ProviderError> {
        let op = format!("create pod {}", request.name);
        let body = self
            .send(self.request(Method::POST, "pods").json(request), &op)
            .await?;
        let pod: PodWire = Self::parse(&body, &op)?;
        Ok(pod.into_record())
    }

    async fn start_pod(&self, id: &str) -> Result<(), ProviderError> {
        self.send(
            self.request(Method::POST, &format!("pods/{id}/start")),
            &format!("start pod {id}"),
        )
        .await
        .map(|_| ())
    }

    async fn stop_pod(&self, id: &str) -> Result<(), ProviderError> {
        self.send(
            self.request(Method::POST, &format!("pods/{id}/stop")),
            &format!("stop pod {id}"),
        )
        .await
        .map(|_| ())
    }

    async fn delete_pod(&self, id: &str) -> Result<(), ProviderError> {
        match self
            .send(
                self.request(Method::DELETE, &format!("pods/{id}")),
                &format!("delete pod {id}"),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Already gone is what we wanted.
            Err(e) if e.status == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn billing(&self, filter: &BillingFilter) -> Result<Vec<BillingRecord>, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("bucketSize", filter.bucket.as_str().to_string()),
            ("grouping", "podId".to_string()),
        ];
        if let Some(ref pod_id) = filter.pod_id {
            query.push(("podId", pod_id.clone()));
        }
        if let Some(start) = filter.start {
            query.push(("startTime", start.to_rfc3339()));
        }
        if let Some(end) = filter.end {
            query.push(("endTime", end.to_rfc3339()));
        }

        let body = self
            .send(
                self.request(Method::GET, "billing/pods").query(&query),
                "billing",
            )
            .await?;
        Self::parse(&body, "billing")
    }
}

/// Pod as the REST API returns it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodWire {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    desired_status: Option<String>,
    #[serde(default)]
    last_started_at: Option<String>,
    #[serde(default)]
    runtime: Option<RuntimeWire>,
    #[serde(default)]
    gpu: Option<GpuWire>,
    #[serde(default)]
    public_ip: Option<String>,
    #[serde(default)]
    port_mappings: Option<BTreeMap<String, u16>>,
    #[serde(default, alias = "image")]
    image_name: Option<String>,
    #[serde(default)]
    cost_per_hr: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeWire {
    #[serde(default)]
    uptime_in_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpuWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    count: Option<u32>,
}

impl PodWire {
    fn into_record(self) -> PodRecord {
        let status = self
            .desired_status
            .as_deref()
            .map(PodStatus::from_provider)
            .unwrap_or(PodStatus::Unknown);

        let uptime_secs = if status.is_running() {
            self.runtime
                .and_then(|r| r.uptime_in_seconds)
                .or_else(|| self.last_started_at.as_deref().and_then(uptime_since))
                .unwrap_or(0)
        } else {
            0
        };

        let gpu = self.gpu.and_then(|g| {
            g.id.map(|type_id| GpuInfo {
                type_id,
                display_name: g.display_name,
                count: g.count.unwrap_or(1),
            })
        });

        let port_mappings = self
            .port_mappings
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(internal, public)| internal.parse::<u16>().ok().map(|p| (p, public)))
            .collect();

        PodRecord {
            name: self.name.unwrap_or_default(),
            id: self.id,
            status,
            uptime_secs,
            gpu,
            network: NetworkInfo {
                public_ip: self.public_ip.filter(|ip| !ip.is_empty()),
                port_mappings,
            },
            image: self.image_name,
            cost_per_hr: self.cost_per_hr,
        }
    }
}

/// Seconds since a provider timestamp, if it parses.
fn uptime_since(raw: &str) -> Option<u64> {
    let started = chrono::DateTime::parse_from_rfc3339(raw)
        .or_else(|_| {
            chrono::DateTime::parse_from_str(
                raw.trim_end_matches(" UTC"),
                "%Y-%m-%d %H:%M:%S%.f %z",
            )
        })
        .ok()?;
    let secs = chrono::Utc::now()
        .signed_duration_since(started)
        .num_seconds();
    u64::try_from(secs).ok()
}
