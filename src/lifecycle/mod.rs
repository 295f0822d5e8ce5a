//! Lifecycle reconciler: make sure a role's pod exists and is running.
//!
//! ```text
//! Discovering ──▶ AlreadyRunning ─────────────────────────────┐
//!      │                                                      │
//!      ├──▶ Starting ──▶ Started ─────────────────────────────┤
//!      │       │                                              ▼
//!      │       └──▶ RecreateNeeded ──▶ Deleting ──▶ Creating ──▶ Created ──▶ Success
//!      │                  ▲                           │
//!      └──▶ Creating ─────┴───────────────────────────┘
//! ```
//!
//! Every `ensure` starts from `Discovering`; nothing carries over between
//! calls. Only capacity exhaustion leads to `RecreateNeeded`; any other
//! provider failure ends the call immediately.

mod phase;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;

pub use phase::ReconcilePhase;

use crate::error::{LifecycleError, ProviderError};
use crate::pods::{PodRecord, PodRole, PodStatus, PodTemplate, TemplateRegistry};
use crate::provider::ResourceProvider;
use crate::state::OrchestratorState;

use phase::PhaseTracker;

pub const DEFAULT_MAX_RECREATE_ATTEMPTS: u32 = 2;

/// Options for one `ensure` call.
#[derive(Debug, Clone)]
pub struct EnsureOptions {
    /// Start the pod to prove it can run, then stop it again.
    pub verify_only: bool,
    /// Total discover/create cycles allowed before giving up on capacity.
    pub max_recreate_attempts: u32,
    /// Extra env for newly created pods; wins over template env and secrets.
    pub env_overrides: Vec<(String, SecretString)>,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            verify_only: false,
            max_recreate_attempts: DEFAULT_MAX_RECREATE_ATTEMPTS,
            env_overrides: Vec::new(),
        }
    }
}

impl EnsureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_only(mut self, verify: bool) -> Self {
        self.verify_only = verify;
        self
    }

    pub fn max_recreate_attempts(mut self, attempts: u32) -> Self {
        self.max_recreate_attempts = attempts;
        self
    }

    pub fn env_override(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.env_overrides.push((key.into(), value));
        self
    }

    pub fn env_overrides(mut self, overrides: Vec<(String, SecretString)>) -> Self {
        self.env_overrides = overrides;
        self
    }
}

/// What `ensure` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    AlreadyRunning,
    Started,
    Created,
    Recreated,
    Verified,
    CreatedVerified,
    RecreatedVerified,
}

impl LifecycleAction {
    fn verified(self) -> Self {
        match self {
            Self::Created | Self::CreatedVerified => Self::CreatedVerified,
            Self::Recreated | Self::RecreatedVerified => Self::RecreatedVerified,
            Self::AlreadyRunning | Self::Started | Self::Verified => Self::Verified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::Started => "started",
            Self::Created => "created",
            Self::Recreated => "recreated",
            Self::Verified => "verified",
            Self::CreatedVerified => "created_verified",
            Self::RecreatedVerified => "recreated_verified",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one successful `ensure` call.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleResult {
    pub role: PodRole,
    pub success: bool,
    pub pod: Option<PodRecord>,
    pub action: LifecycleAction,
    /// Discover/create cycles used, counting the successful one.
    pub attempts: u32,
    pub warnings: Vec<String>,
}

/// Outcome of stopping every pod that belongs to a role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopOutcome {
    /// Pods this call stopped.
    pub stopped: Vec<PodRecord>,
    pub already_stopped: Vec<PodRecord>,
    /// Duplicate pods found under the role's prefix.
    pub warnings: Vec<String>,
}

impl StopOutcome {
    /// True when no pod matched the role.
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.already_stopped.is_empty()
    }
}

/// Reconciles one role at a time against the resource provider.
pub struct PodLifecycle {
    provider: Arc<dyn ResourceProvider>,
    templates: Arc<TemplateRegistry>,
    state: Arc<OrchestratorState>,
    recreate_grace: Duration,
}

impl PodLifecycle {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        templates: Arc<TemplateRegistry>,
        state: Arc<OrchestratorState>,
        recreate_grace: Duration,
    ) -> Self {
        Self {
            provider,
            templates,
            state,
            recreate_grace,
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Guarantee `role` has a running pod (or, in verify-only mode, one
    /// proven startable and stopped again).
    ///
    /// Holds the role's lock for the whole call so overlapping callers
    /// cannot both decide to create. Updates the error ledger either way.
    pub async fn ensure(
        &self,
        role: PodRole,
        options: EnsureOptions,
    ) -> Result<LifecycleResult, LifecycleError> {
        let _guard = self.state.lock_role(role).await;

        let result = self.reconcile(role, &options).await;
        match result {
            Ok(ref outcome) => {
                tracing::info!(
                    "{} pod ready: action={} attempts={}",
                    role,
                    outcome.action,
                    outcome.attempts
                );
                self.state.ledger.clear(role).await;
            }
            Err(ref e) => {
                tracing::error!("Failed to ensure {} pod: {}", role, e);
                self.state
                    .ledger
                    .record(role, e.to_string(), e.detail())
                    .await;
            }
        }
        result
    }

    /// Stop every running pod of `role`.
    ///
    /// Duplicates under the role's prefix are all stopped and reported as
    /// warnings. A failed stop does not keep the others running; the first
    /// failure is returned once every pod has been tried.
    pub async fn stop(&self, role: PodRole) -> Result<StopOutcome, ProviderError> {
        let _guard = self.state.lock_role(role).await;
        let template = self.templates.get(role);

        let result = self.stop_locked(template).await;
        match result {
            Ok(_) => self.state.ledger.clear(role).await,
            Err(ref e) => {
                self.state
                    .ledger
                    .record(
                        role,
                        format!("Failed to stop {} pod: {}", role, e),
                        serde_json::json!({ "kind": e.kind, "status": e.status }),
                    )
                    .await
            }
        }
        result
    }

    async fn stop_locked(&self, template: &PodTemplate) -> Result<StopOutcome, ProviderError> {
        let role = template.role;
        // Teardown decides on fresh data only.
        self.state
            .invalidate_role(role, &template.name_prefix)
            .await;

        let candidates: Vec<PodRecord> = self
            .candidates(template)
            .await?
            .into_iter()
            .filter(|p| p.status != PodStatus::Terminated)
            .collect();

        let mut outcome = StopOutcome::default();
        if candidates.is_empty() {
            tracing::info!("No {} pod to stop", role);
            return Ok(outcome);
        }
        if candidates.len() > 1 {
            let ids: Vec<&str> = candidates.iter().map(|p| p.id.as_str()).collect();
            tracing::warn!("Stopping {} {} pods: {}", ids.len(), role, ids.join(", "));
            outcome.warnings.push(format!(
                "{} pods match this role ({}); stopping all",
                candidates.len(),
                ids.join(", ")
            ));
        }

        let mut first_error = None;
        for pod in candidates {
            if pod.status == PodStatus::Stopped {
                tracing::info!("{} pod {} already stopped", role, pod.id);
                outcome.already_stopped.push(pod);
                continue;
            }

            tracing::info!("Stopping {} pod {}", role, pod.id);
            match self.provider.stop_pod(&pod.id).await {
                Ok(()) => {
                    tracing::info!("Stopped {} pod {}", role, pod.id);
                    outcome.stopped.push(pod.with_status(PodStatus::Stopped));
                }
                Err(e) => {
                    tracing::warn!("Failed to stop {} pod {}: {}", role, pod.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.state
            .invalidate_role(role, &template.name_prefix)
            .await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// The role's pod as seen in the (possibly cached) listing.
    pub async fn discover(&self, role: PodRole) -> Result<Option<PodRecord>, ProviderError> {
        let template = self.templates.get(role);
        let candidates = self.candidates(template).await?;
        Ok(pick_candidate(candidates, &mut Vec::new()))
    }

    /// Current state of the role's pod, served from the status cache when
    /// fresh.
    pub async fn observe(&self, role: PodRole) -> Result<Option<PodRecord>, ProviderError> {
        let template = self.templates.get(role);
        self.state
            .pod_status
            .get_or_fetch(role, || async {
                let mut ignored = Vec::new();
                self.discover_fresh(template, &mut ignored).await
            })
            .await
    }

    async fn candidates(&self, template: &PodTemplate) -> Result<Vec<PodRecord>, ProviderError> {
        let prefix = template.name_prefix.clone();
        self.state
            .discovery
            .get_or_fetch(prefix.clone(), || async {
                let pods = self.provider.list_pods().await?;
                Ok(pods
                    .into_iter()
                    .filter(|p| p.matches_prefix(&prefix))
                    .collect())
            })
            .await
    }

    /// Discover through the cache, then confirm the chosen pod directly.
    ///
    /// A pod that no longer exists upstream invalidates the listing and
    /// counts as "none found".
    async fn discover_fresh(
        &self,
        template: &PodTemplate,
        warnings: &mut Vec<String>,
    ) -> Result<Option<PodRecord>, ProviderError> {
        let candidates = self.candidates(template).await?;
        let Some(pod) = pick_candidate(candidates, warnings) else {
            return Ok(None);
        };

        match self.provider.get_pod(&pod.id).await? {
            Some(current) if current.status != PodStatus::Terminated => Ok(Some(current)),
            _ => {
                tracing::debug!(
                    "{} pod {} vanished since listing; treating as absent",
                    template.role,
                    pod.id
                );
                self.state
                    .invalidate_role(template.role, &template.name_prefix)
                    .await;
                Ok(None)
            }
        }
    }

    async fn reconcile(
        &self,
        role: PodRole,
        options: &EnsureOptions,
    ) -> Result<LifecycleResult, LifecycleError> {
        let template = self.templates.get(role);
        let max_attempts = options.max_recreate_attempts.max(1);
        let mut phase = PhaseTracker::new(role);
        let mut warnings = Vec::new();

        let mut current = self
            .discover_fresh(template, &mut warnings)
            .await
            .map_err(|source| LifecycleError::Provider {
                role,
                attempt: 1,
                source,
            })?;
        let mut discarded_prior = false;
        let mut attempt = 0;

        while attempt < max_attempts {
            attempt += 1;
            let provider_err = |source| LifecycleError::Provider {
                role,
                attempt,
                source,
            };

            let (pod, fresh) = match current.take() {
                Some(pod) => (pod, false),
                None => {
                    phase.advance(ReconcilePhase::Creating);
                    match self.create(template, options).await {
                        Ok(pod) => {
                            phase.advance(ReconcilePhase::Created);
                            (pod, true)
                        }
                        Err(e) if e.is_capacity_exhausted() => {
                            tracing::warn!(
                                "{} pod: no capacity for a new pod (attempt {}/{}): {}",
                                role,
                                attempt,
                                max_attempts,
                                e.message
                            );
                            warnings.push(format!("Attempt {attempt}: GPU unavailable for new pod"));
                            phase.advance(ReconcilePhase::RecreateNeeded);
                            self.grace_pause(attempt, max_attempts).await;
                            continue;
                        }
                        Err(e) => return Err(provider_err(e)),
                    }
                }
            };

            if pod.is_running() {
                let action = if !fresh {
                    phase.advance(ReconcilePhase::AlreadyRunning);
                    LifecycleAction::AlreadyRunning
                } else if discarded_prior {
                    LifecycleAction::Recreated
                } else {
                    LifecycleAction::Created
                };
                return Ok(self
                    .finish(template, pod, action, attempt, warnings, options, &mut phase)
                    .await);
            }

            phase.advance(ReconcilePhase::Starting);
            match self.start(template, &pod).await {
                Ok(started) => {
                    phase.advance(ReconcilePhase::Started);
                    let action = if !fresh {
                        LifecycleAction::Started
                    } else if discarded_prior {
                        LifecycleAction::Recreated
                    } else {
                        LifecycleAction::Created
                    };
                    return Ok(self
                        .finish(template, started, action, attempt, warnings, options, &mut phase)
                        .await);
                }
                Err(e) if e.is_capacity_exhausted() => {
                    let which = if fresh { "new pod" } else { "existing pod" };
                    tracing::warn!(
                        "{} pod {}: GPU unavailable (attempt {}/{}), recreating: {}",
                        role,
                        pod.id,
                        attempt,
                        max_attempts,
                        e.message
                    );
                    warnings.push(format!("Attempt {attempt}: GPU unavailable for {which}"));
                    phase.advance(ReconcilePhase::RecreateNeeded);
                    phase.advance(ReconcilePhase::Deleting);
                    self.delete(template, &pod).await.map_err(provider_err)?;
                    discarded_prior = true;
                    self.grace_pause(attempt, max_attempts).await;
                }
                Err(e) => return Err(provider_err(e)),
            }
        }

        phase.advance(ReconcilePhase::Failed);
        Err(LifecycleError::CapacityExhausted {
            role,
            attempts: attempt,
            warnings,
        })
    }

    /// Wait for a deletion to settle, unless no attempt is left.
    async fn grace_pause(&self, attempt: u32, max_attempts: u32) {
        if attempt < max_attempts && !self.recreate_grace.is_zero() {
            tracing::debug!("Waiting {:?} before the next attempt", self.recreate_grace);
            tokio::time::sleep(self.recreate_grace).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        template: &PodTemplate,
        pod: PodRecord,
        action: LifecycleAction,
        attempts: u32,
        mut warnings: Vec<String>,
        options: &EnsureOptions,
        phase: &mut PhaseTracker,
    ) -> LifecycleResult {
        let (pod, action) = if options.verify_only {
            phase.advance(ReconcilePhase::Verifying);
            let result = self.provider.stop_pod(&pod.id).await;
            self.state
                .invalidate_role(template.role, &template.name_prefix)
                .await;
            match result {
                Ok(()) => {
                    tracing::info!(
                        "{} pod {} verified startable and stopped",
                        template.role,
                        pod.id
                    );
                    (pod.with_status(PodStatus::Stopped), action.verified())
                }
                Err(e) => {
                    // Startability is proven; a failed stop only costs money.
                    tracing::warn!(
                        "{} pod {} verified but stop failed: {}",
                        template.role,
                        pod.id,
                        e
                    );
                    warnings.push(format!("Verified pod {} but failed to stop it: {}", pod.id, e));
                    (pod, action.verified())
                }
            }
        } else {
            (pod, action)
        };
        phase.advance(ReconcilePhase::Success);

        LifecycleResult {
            role: template.role,
            success: true,
            pod: Some(pod),
            action,
            attempts,
            warnings,
        }
    }

    async fn create(
        &self,
        template: &PodTemplate,
        options: &EnsureOptions,
    ) -> Result<PodRecord, ProviderError> {
        let request =
            template.create_request(template.pod_name(Utc::now()), &options.env_overrides);
        tracing::info!(
            "Creating {} pod {} (image {}, GPU preference: {})",
            template.role,
            request.name,
            request.image_name,
            request.gpu_type_ids.join(", ")
        );

        let result = self.provider.create_pod(&request).await;
        self.state
            .invalidate_role(template.role, &template.name_prefix)
            .await;
        let pod = result?;

        tracing::info!("Created {} pod {} ({})", template.role, pod.id, pod.status);
        Ok(pod)
    }

    async fn start(
        &self,
        template: &PodTemplate,
        pod: &PodRecord,
    ) -> Result<PodRecord, ProviderError> {
        tracing::info!("Starting {} pod {}", template.role, pod.id);
        let result = self.provider.start_pod(&pod.id).await;
        self.state
            .invalidate_role(template.role, &template.name_prefix)
            .await;
        result?;
        Ok(pod.with_status(PodStatus::Running))
    }

    async fn delete(&self, template: &PodTemplate, pod: &PodRecord) -> Result<(), ProviderError> {
        tracing::info!("Deleting {} pod {}", template.role, pod.id);
        let result = self.provider.delete_pod(&pod.id).await;
        self.state
            .invalidate_role(template.role, &template.name_prefix)
            .await;
        result
    }
}

/// Prefer a running pod; report any extras sharing the prefix.
fn pick_candidate(mut candidates: Vec<PodRecord>, warnings: &mut Vec<String>) -> Option<PodRecord> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() > 1 {
        let ids: Vec<&str> = candidates.iter().map(|p| p.id.as_str()).collect();
        tracing::warn!("Multiple pods share a role prefix: {}", ids.join(", "));
        warnings.push(format!(
            "{} pods match this role ({}); using one",
            candidates.len(),
            ids.join(", ")
        ));
    }
    let idx = candidates
        .iter()
        .position(PodRecord::is_running)
        .unwrap_or(0);
    Some(candidates.swap_remove(idx))
}
