//! Test doubles for the orchestrator's remote collaborators.
//!
//! Provides:
//! - [`StubProvider`]: in-memory resource provider with scriptable failures
//! - [`StubConsumer`]: in-memory consumer control API
//! - [`StubHealthProbe`]: health probe that turns healthy after N checks
//! - [`CallLog`]: ordered record of calls shared by all three stubs
//! - [`TestHarnessBuilder`]: wires the stubs into a [`PodOrchestrator`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use podwarden::pods::PodStatus;
//! use podwarden::testing::TestHarnessBuilder;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarnessBuilder::new().build();
//!     harness.provider.insert_pod("dreams-gen-1", PodStatus::Stopped);
//!     // drive harness.orchestrator, inspect harness.log
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{CacheTtls, PipelineConfig, PodsConfig};
use crate::consumer::{ConsumerApi, EndpointRegistration, HealthProbe, RegistrationStatus};
use crate::error::{ConsumerError, ProviderError, ProviderErrorKind};
use crate::orchestrator::PodOrchestrator;
use crate::pods::{GpuInfo, NetworkInfo, PodRecord, PodStatus, TemplateRegistry};
use crate::provider::{BillingFilter, BillingRecord, CreatePodRequest, ResourceProvider};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The provider's capacity-exhaustion reply, as the HTTP client would parse it.
pub fn capacity_error() -> ProviderError {
    ProviderError::from_response(
        500,
        r#"{"error":"create pod: no machines available with the requested GPU"}"#,
    )
}

/// A non-retryable provider failure.
pub fn api_error(message: &str) -> ProviderError {
    ProviderError::from_response(400, message)
}

/// Ordered log of calls made against the stubs.
///
/// Entries look like `provider.start:pod-1` or `consumer.register:<url>`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Index of the first call starting with `prefix`.
    pub fn first(&self, prefix: &str) -> Option<usize> {
        lock(&self.calls).iter().position(|c| c.starts_with(prefix))
    }

    /// Index of the last call starting with `prefix`.
    pub fn last(&self, prefix: &str) -> Option<usize> {
        lock(&self.calls).iter().rposition(|c| c.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// In-memory [`ResourceProvider`].
///
/// Holds a list of pods that create/start/stop/delete act on. Failures are
/// scripted per operation: queued one-shot errors are used first, then the
/// persistent error if one is set.
pub struct StubProvider {
    log: CallLog,
    pods: Mutex<Vec<PodRecord>>,
    billing: Mutex<Vec<BillingRecord>>,
    next_id: AtomicU32,
    created_status: Mutex<PodStatus>,
    create_failures: Mutex<VecDeque<ProviderError>>,
    start_failures: Mutex<VecDeque<ProviderError>>,
    start_always: Mutex<Option<ProviderError>>,
    /// (name prefix, error) pairs for stop.
    stop_failures: Mutex<Vec<(String, ProviderError)>>,
    list_failing: AtomicBool,
    list_calls: AtomicU32,
    create_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    delete_calls: AtomicU32,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            pods: Mutex::new(Vec::new()),
            billing: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            created_status: Mutex::new(PodStatus::Created),
            create_failures: Mutex::new(VecDeque::new()),
            start_failures: Mutex::new(VecDeque::new()),
            start_always: Mutex::new(None),
            stop_failures: Mutex::new(Vec::new()),
            list_failing: AtomicBool::new(false),
            list_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
        }
    }

    /// Add an existing pod and return it.
    pub fn insert_pod(&self, name: &str, status: PodStatus) -> PodRecord {
        let pod = self.make_pod(name, status, None);
        lock(&self.pods).push(pod.clone());
        pod
    }

    pub fn pods(&self) -> Vec<PodRecord> {
        lock(&self.pods).clone()
    }

    pub fn pod(&self, id: &str) -> Option<PodRecord> {
        lock(&self.pods).iter().find(|p| p.id == id).cloned()
    }

    /// Change a pod's status behind the orchestrator's back.
    pub fn set_status(&self, id: &str, status: PodStatus) {
        if let Some(pod) = lock(&self.pods).iter_mut().find(|p| p.id == id) {
            pod.status = status;
        }
    }

    /// Drop a pod without going through `delete_pod`.
    pub fn remove_pod(&self, id: &str) {
        lock(&self.pods).retain(|p| p.id != id);
    }

    /// Status newly created pods report (default `Created`).
    pub fn set_created_status(&self, status: PodStatus) {
        *lock(&self.created_status) = status;
    }

    pub fn fail_next_create(&self, error: ProviderError) {
        lock(&self.create_failures).push_back(error);
    }

    pub fn fail_next_start(&self, error: ProviderError) {
        lock(&self.start_failures).push_back(error);
    }

    /// Fail every start after the queued failures run out.
    pub fn set_start_failing(&self, error: Option<ProviderError>) {
        *lock(&self.start_always) = error;
    }

    /// Fail stops of pods whose name starts with `prefix`.
    pub fn fail_stop_for(&self, prefix: &str, error: ProviderError) {
        lock(&self.stop_failures).push((prefix.to_string(), error));
    }

    pub fn set_list_failing(&self, fail: bool) {
        self.list_failing.store(fail, Ordering::Relaxed);
    }

    pub fn set_billing(&self, records: Vec<BillingRecord>) {
        *lock(&self.billing) = records;
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    fn make_pod(&self, name: &str, status: PodStatus, gpu: Option<String>) -> PodRecord {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        PodRecord {
            id: format!("pod-{n}"),
            name: name.to_string(),
            status,
            uptime_secs: 0,
            gpu: gpu.map(|type_id| GpuInfo {
                type_id,
                display_name: None,
                count: 1,
            }),
            network: NetworkInfo::default(),
            image: None,
            cost_per_hr: None,
        }
    }

    fn not_found(id: &str) -> ProviderError {
        ProviderError::new(ProviderErrorKind::NotFound, format!("pod {id} not found"))
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for StubProvider {
    async fn list_pods(&self) -> Result<Vec<PodRecord>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        self.log.push("provider.list");
        if self.list_failing.load(Ordering::Relaxed) {
            return Err(ProviderError::new(
                ProviderErrorKind::Network,
                "list pods: connection reset",
            ));
        }
        Ok(self.pods())
    }

    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>, ProviderError> {
        self.log.push(format!("provider.get:{id}"));
        Ok(self.pod(id))
    }

    async fn create_pod(&self, request: &CreatePodRequest) -> Result<PodRecord, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        self.log.push(format!("provider.create:{}", request.name));
        if let Some(err) = lock(&self.create_failures).pop_front() {
            return Err(err);
        }

        let status = *lock(&self.created_status);
        let mut pod = self.make_pod(&request.name, status, request.gpu_type_ids.first().cloned());
        pod.image = Some(request.image_name.clone());
        lock(&self.pods).push(pod.clone());
        Ok(pod)
    }

    async fn start_pod(&self, id: &str) -> Result<(), ProviderError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        self.log.push(format!("provider.start:{id}"));
        if let Some(err) = lock(&self.start_failures).pop_front() {
            return Err(err);
        }
        if let Some(err) = lock(&self.start_always).clone() {
            return Err(err);
        }

        let mut pods = lock(&self.pods);
        let pod = pods
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        pod.status = PodStatus::Running;
        Ok(())
    }

    async fn stop_pod(&self, id: &str) -> Result<(), ProviderError> {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        self.log.push(format!("provider.stop:{id}"));

        let mut pods = lock(&self.pods);
        let pod = pods
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        if let Some((_, err)) = lock(&self.stop_failures)
            .iter()
            .find(|(prefix, _)| pod.name.starts_with(prefix.as_str()))
        {
            return Err(err.clone());
        }
        pod.status = PodStatus::Stopped;
        Ok(())
    }

    async fn delete_pod(&self, id: &str) -> Result<(), ProviderError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.log.push(format!("provider.delete:{id}"));
        lock(&self.pods).retain(|p| p.id != id);
        Ok(())
    }

    async fn billing(&self, filter: &BillingFilter) -> Result<Vec<BillingRecord>, ProviderError> {
        self.log.push("provider.billing");
        Ok(lock(&self.billing)
            .iter()
            .filter(|r| match filter.pod_id {
                Some(ref id) => r.pod_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }
}

/// In-memory consumer control API.
pub struct StubConsumer {
    log: CallLog,
    registration: Mutex<Option<EndpointRegistration>>,
    state: Mutex<serde_json::Value>,
    unreachable: AtomicBool,
    register_failing: AtomicBool,
    unregister_failing: AtomicBool,
}

impl StubConsumer {
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            registration: Mutex::new(None),
            state: Mutex::new(serde_json::json!({ "phase": "idle" })),
            unreachable: AtomicBool::new(false),
            register_failing: AtomicBool::new(false),
            unregister_failing: AtomicBool::new(false),
        }
    }

    /// Pretend an endpoint is already registered.
    pub fn preregister(&self, url: &str) {
        *lock(&self.registration) = Some(EndpointRegistration {
            url: url.to_string(),
            auth_token: None,
        });
    }

    pub fn registration(&self) -> Option<EndpointRegistration> {
        lock(&self.registration).clone()
    }

    /// Every call fails as connection-refused.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    pub fn set_register_failing(&self, fail: bool) {
        self.register_failing.store(fail, Ordering::Relaxed);
    }

    pub fn set_unregister_failing(&self, fail: bool) {
        self.unregister_failing.store(fail, Ordering::Relaxed);
    }

    fn check_reachable(&self) -> Result<(), ConsumerError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(ConsumerError::NotReachable {
                url: "http://consumer.test".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn server_error() -> ConsumerError {
        ConsumerError::Http {
            status: 500,
            body: "internal error".to_string(),
        }
    }
}

impl Default for StubConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumerApi for StubConsumer {
    async fn register_endpoint(
        &self,
        registration: &EndpointRegistration,
    ) -> Result<(), ConsumerError> {
        self.log
            .push(format!("consumer.register:{}", registration.url));
        self.check_reachable()?;
        if self.register_failing.load(Ordering::Relaxed) {
            return Err(Self::server_error());
        }
        *lock(&self.registration) = Some(registration.clone());
        Ok(())
    }

    async fn unregister_endpoint(&self) -> Result<(), ConsumerError> {
        self.log.push("consumer.unregister");
        self.check_reachable()?;
        if self.unregister_failing.load(Ordering::Relaxed) {
            return Err(Self::server_error());
        }
        *lock(&self.registration) = None;
        Ok(())
    }

    async fn registration_status(&self) -> Result<RegistrationStatus, ConsumerError> {
        self.log.push("consumer.status");
        self.check_reachable()?;
        Ok(match *lock(&self.registration) {
            Some(ref reg) => RegistrationStatus {
                registered: true,
                url: Some(reg.url.clone()),
                connected: Some(false),
            },
            None => RegistrationStatus::default(),
        })
    }

    async fn health(&self) -> Result<serde_json::Value, ConsumerError> {
        self.log.push("consumer.health");
        self.check_reachable()?;
        Ok(serde_json::json!({ "status": "ok" }))
    }

    async fn state_info(&self) -> Result<serde_json::Value, ConsumerError> {
        self.log.push("consumer.state");
        self.check_reachable()?;
        Ok(lock(&self.state).clone())
    }

    async fn clear_state(&self) -> Result<(), ConsumerError> {
        self.log.push("consumer.clear_state");
        self.check_reachable()?;
        *lock(&self.state) = serde_json::json!({ "phase": "idle" });
        Ok(())
    }

    async fn abort_startup(&self) -> Result<(), ConsumerError> {
        self.log.push("consumer.abort_startup");
        self.check_reachable()?;
        *lock(&self.state) = serde_json::json!({ "phase": "aborted" });
        Ok(())
    }
}

/// Health probe that reports healthy from the Nth check onwards.
pub struct StubHealthProbe {
    log: CallLog,
    healthy_from: Option<u32>,
    checks: AtomicU32,
}

impl StubHealthProbe {
    pub fn healthy_after(checks: u32) -> Self {
        Self {
            log: CallLog::new(),
            healthy_from: Some(checks.max(1)),
            checks: AtomicU32::new(0),
        }
    }

    pub fn never_healthy() -> Self {
        Self {
            log: CallLog::new(),
            healthy_from: None,
            checks: AtomicU32::new(0),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HealthProbe for StubHealthProbe {
    async fn probe(&self, url: &str) -> Result<bool, ConsumerError> {
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        self.log.push(format!("health.probe:{url}"));
        Ok(self.healthy_from.is_some_and(|from| n >= from))
    }
}

/// Orchestrator wired to stubs, plus handles to inspect them.
pub struct TestHarness {
    pub orchestrator: PodOrchestrator,
    pub provider: Arc<StubProvider>,
    pub consumer: Arc<StubConsumer>,
    pub probe: Arc<StubHealthProbe>,
    pub log: CallLog,
}

/// Builder for a [`TestHarness`].
///
/// Defaults work without any network:
/// - Templates: built-in defaults (`dreams-gen`, `dreams-orch` prefixes)
/// - Health: healthy on the first check
/// - Timing: 10s recreate grace, 30s health timeout, 5s poll; run tests
///   with `start_paused = true` to skip the waits
pub struct TestHarnessBuilder {
    pipeline: PipelineConfig,
    pods: PodsConfig,
    probe: Option<StubHealthProbe>,
}

impl TestHarnessBuilder {
    pub fn new() -> Self {
        let pipeline = PipelineConfig {
            consumer_url: "http://consumer.test".to_string(),
            health_timeout: Duration::from_secs(30),
            health_poll_interval: Duration::from_secs(5),
            recreate_grace: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(60),
            cache: CacheTtls::default(),
            ..PipelineConfig::default()
        };
        Self {
            pipeline,
            pods: PodsConfig::default(),
            probe: None,
        }
    }

    pub fn with_pipeline(mut self, f: impl FnOnce(&mut PipelineConfig)) -> Self {
        f(&mut self.pipeline);
        self
    }

    pub fn with_pods(mut self, pods: PodsConfig) -> Self {
        self.pods = pods;
        self
    }

    pub fn with_probe(mut self, probe: StubHealthProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> TestHarness {
        let log = CallLog::new();
        let provider = Arc::new(StubProvider::with_log(log.clone()));
        let consumer = Arc::new(StubConsumer::with_log(log.clone()));
        let probe = Arc::new(
            self.probe
                .unwrap_or_else(|| StubHealthProbe::healthy_after(1))
                .with_log(log.clone()),
        );

        let orchestrator = PodOrchestrator::with_components(
            &self.pipeline,
            TemplateRegistry::from_config(&self.pods),
            Arc::clone(&provider) as Arc<dyn ResourceProvider>,
            Arc::clone(&consumer) as Arc<dyn ConsumerApi>,
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
        );

        TestHarness {
            orchestrator,
            provider,
            consumer,
            probe,
            log,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
