//! Orchestrator facade: the surface the dashboard and CLI talk to.
//!
//! Owns the shared [`OrchestratorState`] and wires the provider, consumer,
//! reconciler and sequencer together. Everything is built eagerly in
//! [`PodOrchestrator::new`]; nothing is initialised on first use.

mod status;

use std::sync::Arc;

use rust_decimal::Decimal;

pub use status::{BillingSummary, ConsumerStateReport, RoleStatus, StatusReport};

use crate::config::{Config, PipelineConfig};
use crate::consumer::{ConsumerApi, HealthProbe, HttpConsumerClient, HttpHealthProbe};
use crate::error::{ConfigError, ConsumerError, LifecycleError, PipelineError, ProviderError};
use crate::ledger::ErrorSnapshot;
use crate::lifecycle::{EnsureOptions, LifecycleResult, PodLifecycle};
use crate::pipeline::{PipelineSequencer, SequenceReport, StartOptions};
use crate::pods::{PodRole, TemplateRegistry};
use crate::provider::{BillingFilter, ResourceProvider, RunpodProvider};
use crate::state::OrchestratorState;

pub struct PodOrchestrator {
    provider: Arc<dyn ResourceProvider>,
    consumer: Arc<dyn ConsumerApi>,
    templates: Arc<TemplateRegistry>,
    state: Arc<OrchestratorState>,
    lifecycle: Arc<PodLifecycle>,
    sequencer: PipelineSequencer,
}

impl PodOrchestrator {
    /// Build the orchestrator with the HTTP-backed provider and consumer.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let provider =
            RunpodProvider::new(&config.provider).map_err(|e| ConfigError::InvalidValue {
                key: "RUNPOD_API_BASE".to_string(),
                message: e.to_string(),
            })?;
        let consumer = HttpConsumerClient::new(
            &config.pipeline.consumer_url,
            config.pipeline.consumer_token.clone(),
            config.pipeline.consumer_timeout,
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "CONSUMER_URL".to_string(),
            message: e.to_string(),
        })?;
        let probe = HttpHealthProbe::new(config.pipeline.consumer_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                key: "CONSUMER_TIMEOUT_SECS".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self::with_components(
            &config.pipeline,
            TemplateRegistry::from_config(&config.pods),
            Arc::new(provider),
            Arc::new(consumer),
            Arc::new(probe),
        ))
    }

    /// Build the orchestrator from explicit collaborators.
    pub fn with_components(
        pipeline: &PipelineConfig,
        templates: TemplateRegistry,
        provider: Arc<dyn ResourceProvider>,
        consumer: Arc<dyn ConsumerApi>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let templates = Arc::new(templates);
        let state = Arc::new(OrchestratorState::new(pipeline.cache));
        let lifecycle = Arc::new(PodLifecycle::new(
            Arc::clone(&provider),
            Arc::clone(&templates),
            Arc::clone(&state),
            pipeline.recreate_grace,
        ));
        let sequencer = PipelineSequencer::new(
            Arc::clone(&lifecycle),
            Arc::clone(&consumer),
            probe,
            Arc::clone(&state),
            pipeline.clone(),
        );

        Self {
            provider,
            consumer,
            templates,
            state,
            lifecycle,
            sequencer,
        }
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub async fn ensure(
        &self,
        role: PodRole,
        options: EnsureOptions,
    ) -> Result<LifecycleResult, LifecycleError> {
        self.lifecycle.ensure(role, options).await
    }

    pub async fn start_pipeline(
        &self,
        options: StartOptions,
    ) -> Result<SequenceReport, PipelineError> {
        self.sequencer.start_pipeline(options).await
    }

    pub async fn stop_pipeline(&self) -> Result<SequenceReport, PipelineError> {
        self.sequencer.stop_pipeline().await
    }

    /// Current pipeline summary.
    ///
    /// Served from the summary cache when fresh. Summaries with a failed
    /// lookup are returned but not cached. The error snapshot is always
    /// read live.
    pub async fn get_status(&self) -> StatusReport {
        let summary = self
            .state
            .summary
            .get_or_fetch((), || async {
                let report = self.build_status().await;
                if report.is_complete() {
                    Ok(report)
                } else {
                    Err(report)
                }
            })
            .await;

        let mut report = match summary {
            Ok(report) | Err(report) => report,
        };
        report.errors = self.state.ledger.snapshot().await;
        report
    }

    /// Drop every cached read, then build a fresh summary.
    pub async fn refresh_status(&self) -> StatusReport {
        self.state.invalidate_all().await;
        self.get_status().await
    }

    pub async fn get_errors(&self) -> ErrorSnapshot {
        self.state.ledger.snapshot().await
    }

    pub async fn consumer_state(&self) -> Result<ConsumerStateReport, ConsumerError> {
        let (health, registration, state) = tokio::try_join!(
            self.consumer.health(),
            self.consumer.registration_status(),
            self.consumer.state_info()
        )?;
        Ok(ConsumerStateReport {
            health,
            registration,
            state,
        })
    }

    pub async fn clear_consumer_state(&self) -> Result<(), ConsumerError> {
        self.consumer.clear_state().await?;
        tracing::info!("Cleared consumer state");
        Ok(())
    }

    pub async fn abort_consumer_startup(&self) -> Result<(), ConsumerError> {
        self.consumer.abort_startup().await?;
        tracing::info!("Aborted consumer startup");
        Ok(())
    }

    pub async fn billing(&self, filter: &BillingFilter) -> Result<BillingSummary, ProviderError> {
        let records = self.provider.billing(filter).await?;
        Ok(BillingSummary::from_records(records))
    }

    async fn build_status(&self) -> StatusReport {
        let (generation, orchestration, consumer) = tokio::join!(
            self.role_status(PodRole::Generation),
            self.role_status(PodRole::Orchestration),
            self.consumer.registration_status()
        );

        let estimated_hourly_cost = [&generation, &orchestration]
            .into_iter()
            .filter_map(|status| {
                let pod = status.pod.as_ref().filter(|p| p.is_running())?;
                Some(
                    pod.cost_per_hr
                        .unwrap_or(self.templates.get(status.role).estimated_hourly_cost),
                )
            })
            .sum::<Decimal>();

        let (consumer, consumer_error) = match consumer {
            Ok(status) => (Some(status), None),
            Err(e) => {
                tracing::debug!("Consumer registration lookup failed: {}", e);
                (None, Some(e.to_string()))
            }
        };

        StatusReport {
            generation,
            orchestration,
            consumer,
            consumer_error,
            errors: self.state.ledger.snapshot().await,
            estimated_hourly_cost,
            generated_at: chrono::Utc::now(),
        }
    }

    async fn role_status(&self, role: PodRole) -> RoleStatus {
        match self.lifecycle.observe(role).await {
            Ok(pod) => {
                let endpoint = pod
                    .as_ref()
                    .filter(|p| p.is_running())
                    .map(|p| self.templates.get(role).endpoint_url(&p.id));
                RoleStatus {
                    role,
                    pod,
                    endpoint,
                    lookup_error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Status lookup for {} pod failed: {}", role, e);
                RoleStatus {
                    role,
                    pod: None,
                    endpoint: None,
                    lookup_error: Some(e.to_string()),
                }
            }
        }
    }
}
