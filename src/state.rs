//! Process-wide orchestrator state.
//!
//! Everything that outlives a single call lives here: the read caches, the
//! error ledger, and the locks that serialise lifecycle operations. One
//! instance is built at startup and shared by reference.

use tokio::sync::{Mutex, MutexGuard};

use crate::cache::TtlCache;
use crate::config::CacheTtls;
use crate::ledger::ErrorLedger;
use crate::orchestrator::StatusReport;
use crate::pods::{PodRecord, PodRole};

pub struct OrchestratorState {
    /// Pod listings filtered by name prefix, keyed by that prefix.
    pub discovery: TtlCache<String, Vec<PodRecord>>,
    /// Latest observed pod per role (`None` = no pod exists).
    pub pod_status: TtlCache<PodRole, Option<PodRecord>>,
    /// Aggregated dashboard summary.
    pub summary: TtlCache<(), StatusReport>,
    pub ledger: ErrorLedger,
    generation_lock: Mutex<()>,
    orchestration_lock: Mutex<()>,
    pipeline_lock: Mutex<()>,
}

impl OrchestratorState {
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            discovery: TtlCache::new("discovery", ttls.discovery),
            pod_status: TtlCache::new("pod_status", ttls.status),
            summary: TtlCache::new("summary", ttls.summary),
            ledger: ErrorLedger::new(),
            generation_lock: Mutex::new(()),
            orchestration_lock: Mutex::new(()),
            pipeline_lock: Mutex::new(()),
        }
    }

    /// Held for the whole of an `ensure` or stop on `role`.
    pub async fn lock_role(&self, role: PodRole) -> MutexGuard<'_, ()> {
        match role {
            PodRole::Generation => self.generation_lock.lock().await,
            PodRole::Orchestration => self.orchestration_lock.lock().await,
        }
    }

    /// Held for the whole of a pipeline start or stop.
    pub fn pipeline_lock(&self) -> &Mutex<()> {
        &self.pipeline_lock
    }

    /// Drop every cached read that could describe `role`'s pod.
    ///
    /// Called after each start/stop/create/delete, before the mutating call
    /// returns to its caller.
    pub async fn invalidate_role(&self, role: PodRole, name_prefix: &str) {
        self.discovery.invalidate(&name_prefix.to_string()).await;
        self.pod_status.invalidate(&role).await;
        self.summary.invalidate(&()).await;
    }

    pub async fn invalidate_all(&self) {
        futures::join!(
            self.discovery.clear(),
            self.pod_status.clear(),
            self.summary.clear()
        );
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new(CacheTtls::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pods::{NetworkInfo, PodStatus};

    fn pod() -> PodRecord {
        PodRecord {
            id: "p1".to_string(),
            name: "dreams-gen-1".to_string(),
            status: PodStatus::Running,
            uptime_secs: 0,
            gpu: None,
            network: NetworkInfo::default(),
            image: None,
            cost_per_hr: None,
        }
    }

    #[tokio::test]
    async fn invalidate_role_leaves_other_role_alone() {
        let state = OrchestratorState::default();
        state
            .discovery
            .put("dreams-gen".to_string(), vec![pod()])
            .await;
        state
            .discovery
            .put("dreams-orch".to_string(), Vec::new())
            .await;
        state.pod_status.put(PodRole::Generation, Some(pod())).await;
        state.pod_status.put(PodRole::Orchestration, None).await;

        state
            .invalidate_role(PodRole::Generation, "dreams-gen")
            .await;

        assert!(state.discovery.get(&"dreams-gen".to_string()).await.is_none());
        assert!(state.pod_status.get(&PodRole::Generation).await.is_none());
        assert_eq!(
            state.discovery.get(&"dreams-orch".to_string()).await,
            Some(Vec::new())
        );
        assert_eq!(state.pod_status.get(&PodRole::Orchestration).await, Some(None));
    }

    #[test]
    fn invalidate_all_empties_every_cache() {
        let state = OrchestratorState::default();
        tokio_test::block_on(async {
            state.pod_status.put(PodRole::Generation, Some(pod())).await;
            state.discovery.put("dreams-gen".to_string(), vec![pod()]).await;
            state.invalidate_all().await;
        });
        assert!(tokio_test::block_on(state.pod_status.get(&PodRole::Generation)).is_none());
        assert!(tokio_test::block_on(state.discovery.get(&"dreams-gen".to_string())).is_none());
    }

    #[tokio::test]
    async fn role_locks_are_independent() {
        let state = OrchestratorState::default();
        let _held = state.lock_role(PodRole::Generation).await;
        // Would deadlock if both roles shared one lock.
        let _other = state.lock_role(PodRole::Orchestration).await;
        assert!(state.generation_lock.try_lock().is_err());
    }
}
