//! Lifecycle reconciler tests against the in-memory provider.
//!
//! Covers discovery, start/create/recreate on capacity exhaustion, the
//! recreate bound, verify-only mode and error ledger updates. All tests run
//! on paused time so recreate grace periods cost nothing.

use pretty_assertions::assert_eq;

use podwarden::error::LifecycleError;
use podwarden::lifecycle::{EnsureOptions, LifecycleAction};
use podwarden::pods::{PodRole, PodStatus};
use podwarden::testing::{TestHarnessBuilder, api_error, capacity_error};

#[tokio::test(start_paused = true)]
async fn ensure_is_idempotent_on_running_pod() {
    let harness = TestHarnessBuilder::new().build();

    let first = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(first.action, LifecycleAction::Created);
    assert!(first.pod.as_ref().unwrap().is_running());

    let second = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(second.action, LifecycleAction::AlreadyRunning);
    assert_eq!(second.attempts, 1);
    assert_eq!(
        second.pod.unwrap().id,
        first.pod.unwrap().id,
        "second ensure must reuse the running pod"
    );
    assert_eq!(harness.provider.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stopped_pod_is_started_not_recreated() {
    let harness = TestHarnessBuilder::new().build();
    let pod = harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::Started);
    assert_eq!(result.pod.unwrap().id, pod.id);
    assert_eq!(harness.provider.create_calls(), 0);
    assert!(harness.provider.pod(&pod.id).unwrap().is_running());
}

#[tokio::test(start_paused = true)]
async fn capacity_on_existing_pod_recreates() {
    let harness = TestHarnessBuilder::new().build();
    let old = harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);
    harness.provider.fail_next_start(capacity_error());

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.action, LifecycleAction::Recreated);
    assert_eq!(result.attempts, 2);
    assert_eq!(
        result.warnings,
        vec!["Attempt 1: GPU unavailable for existing pod".to_string()]
    );

    let pod = result.pod.unwrap();
    assert_ne!(pod.id, old.id);
    assert!(pod.is_running());
    assert!(harness.provider.pod(&old.id).is_none(), "old pod must be deleted");
    assert_eq!(harness.provider.delete_calls(), 1);
    assert_eq!(harness.provider.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn capacity_exhaustion_is_bounded() {
    let harness = TestHarnessBuilder::new().build();
    harness.provider.set_start_failing(Some(capacity_error()));

    let err = harness
        .orchestrator
        .ensure(
            PodRole::Generation,
            EnsureOptions::new().max_recreate_attempts(2),
        )
        .await
        .unwrap_err();

    match err {
        LifecycleError::CapacityExhausted {
            role,
            attempts,
            ref warnings,
        } => {
            assert_eq!(role, PodRole::Generation);
            assert_eq!(attempts, 2);
            assert_eq!(
                warnings,
                &vec![
                    "Attempt 1: GPU unavailable for new pod".to_string(),
                    "Attempt 2: GPU unavailable for new pod".to_string(),
                ]
            );
        }
        other => panic!("expected CapacityExhausted, got {other:?}"),
    }
    assert_eq!(harness.provider.create_calls(), 2);
    assert_eq!(harness.provider.delete_calls(), 2);
    assert!(harness.provider.pods().is_empty());

    let errors = harness.orchestrator.get_errors().await;
    let record = errors.generation.expect("failure must be recorded");
    assert_eq!(record.detail["attempt"], 2);
    assert!(errors.orchestration.is_none());
}

#[tokio::test(start_paused = true)]
async fn ledger_clears_on_next_success() {
    let harness = TestHarnessBuilder::new().build();
    harness.provider.set_start_failing(Some(capacity_error()));
    assert!(
        harness
            .orchestrator
            .ensure(PodRole::Generation, EnsureOptions::default())
            .await
            .is_err()
    );
    assert!(harness.orchestrator.get_errors().await.generation.is_some());

    harness.provider.set_start_failing(None);
    harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    assert!(harness.orchestrator.get_errors().await.generation.is_none());
}

#[tokio::test(start_paused = true)]
async fn other_failures_are_not_retried() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-orch-20261001-120000", PodStatus::Stopped);
    harness.provider.fail_next_start(api_error("invalid image reference"));

    let err = harness
        .orchestrator
        .ensure(PodRole::Orchestration, EnsureOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Provider {
            role: PodRole::Orchestration,
            attempt: 1,
            ..
        }
    ));
    assert_eq!(harness.provider.delete_calls(), 0);
    assert_eq!(harness.provider.create_calls(), 0);
    assert!(harness.orchestrator.get_errors().await.orchestration.is_some());
}

#[tokio::test(start_paused = true)]
async fn capacity_on_create_counts_as_attempt() {
    let harness = TestHarnessBuilder::new().build();
    harness.provider.fail_next_create(capacity_error());

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::Created);
    assert_eq!(result.attempts, 2);
    assert_eq!(
        result.warnings,
        vec!["Attempt 1: GPU unavailable for new pod".to_string()]
    );
    assert_eq!(harness.provider.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn verify_only_stops_after_start() {
    let harness = TestHarnessBuilder::new().build();
    let pod = harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::new().verify_only(true))
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::Verified);
    assert_eq!(result.pod.unwrap().status, PodStatus::Stopped);
    assert_eq!(
        harness.provider.pod(&pod.id).unwrap().status,
        PodStatus::Stopped
    );
    let start = harness.log.first(&format!("provider.start:{}", pod.id));
    let stop = harness.log.first(&format!("provider.stop:{}", pod.id));
    assert!(start < stop);
}

#[tokio::test(start_paused = true)]
async fn verify_only_after_recreate() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);
    harness.provider.fail_next_start(capacity_error());

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::new().verify_only(true))
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::RecreatedVerified);
    assert_eq!(result.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn verify_only_stop_failure_is_a_warning() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);
    harness
        .provider
        .fail_stop_for("dreams-gen", api_error("stop rejected"));

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::new().verify_only(true))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.action, LifecycleAction::Verified);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("failed to stop"));
}

#[tokio::test(start_paused = true)]
async fn duplicate_pods_prefer_running_and_warn() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);
    let running = harness
        .provider
        .insert_pod("dreams-gen-20261002-120000", PodStatus::Running);

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::AlreadyRunning);
    assert_eq!(result.pod.unwrap().id, running.id);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("2 pods match"));
}

#[tokio::test(start_paused = true)]
async fn vanished_pod_is_not_trusted_from_cache() {
    let harness = TestHarnessBuilder::new().build();
    let pod = harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Running);

    // Populates the discovery cache with the pod.
    let status = harness.orchestrator.get_status().await;
    assert_eq!(status.generation.pod.as_ref().unwrap().id, pod.id);

    // Deleted out of band while the listing is still cached.
    harness.provider.remove_pod(&pod.id);

    let result = harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(result.action, LifecycleAction::Created);
    assert_ne!(result.pod.unwrap().id, pod.id);
}

#[tokio::test(start_paused = true)]
async fn roles_do_not_share_pods() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Running);

    let result = harness
        .orchestrator
        .ensure(PodRole::Orchestration, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(result.action, LifecycleAction::Created);
    assert!(result.pod.unwrap().name.starts_with("dreams-orch-"));
}
