//! Pipeline sequencer: bring both pods up in order, or tear them down.
//!
//! Start runs four steps against one [`SequenceReport`]:
//!
//! 1. remove any stale endpoint registration from the consumer
//! 2. ensure the generation pod is running
//! 3. register its endpoint with the consumer and wait for it to be healthy
//! 4. ensure the orchestration pod is running
//!
//! Stop runs the reverse: orchestration pod, consumer registration,
//! generation pod. Teardown never stops early.
//!
//! Step failures land in the report, not in the return value. Only a
//! busy pipeline lock or an internal inconsistency is returned as `Err`.

mod health;
mod report;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::MutexGuard;

pub use health::{HealthOutcome, wait_for_healthy};
pub use report::{SequenceOperation, SequenceReport, SequenceStep, StepStatus};

use crate::config::PipelineConfig;
use crate::consumer::{ConsumerApi, EndpointRegistration, HealthProbe};
use crate::error::PipelineError;
use crate::ledger::ErrorSubject;
use crate::lifecycle::{EnsureOptions, LifecycleResult, PodLifecycle, StopOutcome};
use crate::pods::{PodRecord, PodRole};
use crate::state::OrchestratorState;

pub const STEP_CLEAR_REGISTRATION: &str = "clear_stale_registration";
pub const STEP_ENSURE_GENERATION: &str = "ensure_generation";
pub const STEP_REGISTER_ENDPOINT: &str = "register_endpoint";
pub const STEP_HEALTH_CHECK: &str = "health_check";
pub const STEP_ENSURE_ORCHESTRATION: &str = "ensure_orchestration";
pub const STEP_STOP_ORCHESTRATION: &str = "stop_orchestration";
pub const STEP_UNREGISTER_ENDPOINT: &str = "unregister_endpoint";
pub const STEP_STOP_GENERATION: &str = "stop_generation";

/// Per-run options for `start_pipeline`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Overrides the configured health-check deadline.
    pub health_timeout: Option<Duration>,
    /// Extra env for any pod created during this run.
    pub env_overrides: Vec<(String, SecretString)>,
}

pub struct PipelineSequencer {
    lifecycle: Arc<PodLifecycle>,
    consumer: Arc<dyn ConsumerApi>,
    probe: Arc<dyn HealthProbe>,
    state: Arc<OrchestratorState>,
    config: PipelineConfig,
}

impl PipelineSequencer {
    pub fn new(
        lifecycle: Arc<PodLifecycle>,
        consumer: Arc<dyn ConsumerApi>,
        probe: Arc<dyn HealthProbe>,
        state: Arc<OrchestratorState>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            lifecycle,
            consumer,
            probe,
            state,
            config,
        }
    }

    pub async fn start_pipeline(
        &self,
        options: StartOptions,
    ) -> Result<SequenceReport, PipelineError> {
        let _guard = self.acquire(SequenceOperation::Start).await?;
        let mut report = SequenceReport::new(SequenceOperation::Start);
        tracing::info!("Starting pipeline");

        self.clear_stale_registration(&mut report).await;

        let generation = match self
            .lifecycle
            .ensure(
                PodRole::Generation,
                EnsureOptions::new()
                    .max_recreate_attempts(self.config.generation_max_attempts)
                    .env_overrides(options.env_overrides.clone()),
            )
            .await
        {
            Ok(result) => {
                record_ensure(&mut report, STEP_ENSURE_GENERATION, &result);
                report.generation = Some(result.clone());
                result
            }
            Err(e) => {
                report.fail(STEP_ENSURE_GENERATION, e.to_string());
                for step in [
                    STEP_REGISTER_ENDPOINT,
                    STEP_HEALTH_CHECK,
                    STEP_ENSURE_ORCHESTRATION,
                ] {
                    report.skip(step);
                }
                return Ok(self.conclude(report).await);
            }
        };

        let pod = generation.pod.ok_or_else(|| {
            PipelineError::Internal("generation pod ensured but no pod record returned".to_string())
        })?;
        let template = self.lifecycle.templates().get(PodRole::Generation);

        // The proxy URL is derived from the pod id; no need to wait for the pod.
        let endpoint = template.endpoint_url(&pod.id);
        let registration = EndpointRegistration {
            url: endpoint.clone(),
            auth_token: self.lifecycle.templates().endpoint_token().cloned(),
        };
        match self.consumer.register_endpoint(&registration).await {
            Ok(()) => {
                tracing::info!("Registered generation endpoint {}", endpoint);
                report.ok(STEP_REGISTER_ENDPOINT, Some(endpoint.clone()));
            }
            Err(e) => report.warn(
                STEP_REGISTER_ENDPOINT,
                format!("failed to register {}: {}", endpoint, e),
            ),
        }
        report.endpoint = Some(endpoint);

        let timeout = options.health_timeout.unwrap_or(self.config.health_timeout);
        let outcome = wait_for_healthy(
            self.probe.as_ref(),
            &template.health_url(&pod.id),
            timeout,
            self.config.health_poll_interval,
        )
        .await;
        if outcome.healthy {
            report.ok(
                STEP_HEALTH_CHECK,
                Some(format!(
                    "healthy after {} checks ({:.0}s)",
                    outcome.checks,
                    outcome.elapsed.as_secs_f64()
                )),
            );
        } else {
            let mut message = format!(
                "generation pod not healthy within {}s; continuing",
                timeout.as_secs()
            );
            if let Some(ref err) = outcome.last_error {
                message.push_str(&format!(" (last error: {err})"));
            }
            report.warn(STEP_HEALTH_CHECK, message);
        }

        match self
            .lifecycle
            .ensure(
                PodRole::Orchestration,
                EnsureOptions::new()
                    .max_recreate_attempts(self.config.orchestration_max_attempts)
                    .env_overrides(options.env_overrides),
            )
            .await
        {
            Ok(result) => {
                record_ensure(&mut report, STEP_ENSURE_ORCHESTRATION, &result);
                report.orchestration = Some(result);
            }
            Err(e) => report.fail(STEP_ENSURE_ORCHESTRATION, e.to_string()),
        }

        Ok(self.conclude(report).await)
    }

    pub async fn stop_pipeline(&self) -> Result<SequenceReport, PipelineError> {
        let _guard = self.acquire(SequenceOperation::Stop).await?;
        let mut report = SequenceReport::new(SequenceOperation::Stop);
        tracing::info!("Stopping pipeline");

        self.stop_role(PodRole::Orchestration, STEP_STOP_ORCHESTRATION, &mut report)
            .await;

        match self.consumer.unregister_endpoint().await {
            Ok(()) => {
                tracing::info!("Unregistered generation endpoint");
                report.ok(STEP_UNREGISTER_ENDPOINT, None);
            }
            Err(e) => report.warn(STEP_UNREGISTER_ENDPOINT, e.to_string()),
        }

        self.stop_role(PodRole::Generation, STEP_STOP_GENERATION, &mut report)
            .await;

        Ok(self.conclude(report).await)
    }

    async fn acquire(
        &self,
        operation: SequenceOperation,
    ) -> Result<MutexGuard<'_, ()>, PipelineError> {
        let waited = self.config.lock_timeout;
        match tokio::time::timeout(waited, self.state.pipeline_lock().lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(
                    "Pipeline {} rejected: another run held the lock for {:?}",
                    operation.as_str(),
                    waited
                );
                Err(PipelineError::Busy {
                    operation: operation.as_str(),
                    waited,
                })
            }
        }
    }

    async fn clear_stale_registration(&self, report: &mut SequenceReport) {
        let status = match self.consumer.registration_status().await {
            Ok(status) => status,
            Err(e) => {
                report.warn(
                    STEP_CLEAR_REGISTRATION,
                    format!("could not read registration status: {e}"),
                );
                return;
            }
        };

        if !status.registered {
            report.ok(STEP_CLEAR_REGISTRATION, None);
            return;
        }

        match self.consumer.unregister_endpoint().await {
            Ok(()) => {
                let url = status.url.unwrap_or_default();
                tracing::info!("Removed stale endpoint registration {}", url);
                report.ok(STEP_CLEAR_REGISTRATION, Some(format!("removed {url}")));
            }
            Err(e) => report.warn(
                STEP_CLEAR_REGISTRATION,
                format!("failed to remove stale registration: {e}"),
            ),
        }
    }

    async fn stop_role(&self, role: PodRole, step: &'static str, report: &mut SequenceReport) {
        match self.lifecycle.stop(role).await {
            Ok(outcome) if outcome.is_empty() => report.ok(step, Some("no pod found".to_string())),
            Ok(outcome) => {
                report.ok(step, Some(describe_stop(&outcome)));
                report
                    .warnings
                    .extend(outcome.warnings.iter().map(|w| format!("{}: {}", role, w)));
            }
            Err(e) => report.warn(step, format!("failed to stop {} pod: {}", role, e)),
        }
    }

    /// Stamp the report and mirror its outcome into the pipeline ledger slot.
    async fn conclude(&self, report: SequenceReport) -> SequenceReport {
        let report = report.finish();
        let op = report.operation.as_str();

        if report.success && report.warnings.is_empty() {
            self.state.ledger.clear(ErrorSubject::Pipeline).await;
            tracing::info!("Pipeline {} complete", op);
        } else {
            let failed: Vec<&str> = report
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .map(|s| s.name)
                .collect();
            let message = if report.success {
                format!("Pipeline {} completed with {} warnings", op, report.warnings.len())
            } else {
                format!("Pipeline {} failed at {}", op, failed.join(", "))
            };
            tracing::warn!("{}", message);
            self.state
                .ledger
                .record(
                    ErrorSubject::Pipeline,
                    message,
                    serde_json::json!({
                        "operation": op,
                        "failed_steps": failed,
                        "warnings": report.warnings,
                    }),
                )
                .await;
        }
        report
    }
}

fn describe_stop(outcome: &StopOutcome) -> String {
    let ids = |pods: &[PodRecord]| {
        pods.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(", ")
    };
    let mut parts = Vec::new();
    if !outcome.stopped.is_empty() {
        parts.push(format!("stopped {}", ids(&outcome.stopped)));
    }
    if !outcome.already_stopped.is_empty() {
        parts.push(format!("{} already stopped", ids(&outcome.already_stopped)));
    }
    parts.join("; ")
}

fn record_ensure(report: &mut SequenceReport, step: &'static str, result: &LifecycleResult) {
    let pod_id = result.pod.as_ref().map(|p| p.id.as_str()).unwrap_or("-");
    report.ok(
        step,
        Some(format!(
            "{} {} (attempts: {})",
            result.action, pod_id, result.attempts
        )),
    );
    report
        .warnings
        .extend(result.warnings.iter().map(|w| format!("{}: {}", result.role, w)));
}
