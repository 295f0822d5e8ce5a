//! Status summary, consumer controls and billing through the orchestrator.

use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use podwarden::lifecycle::EnsureOptions;
use podwarden::pipeline::StartOptions;
use podwarden::pods::{PodRole, PodStatus};
use podwarden::provider::{BillingBucket, BillingFilter, BillingRecord};
use podwarden::testing::TestHarnessBuilder;

#[tokio::test(start_paused = true)]
async fn status_is_cached_until_a_mutation() {
    let harness = TestHarnessBuilder::new().build();

    let first = harness.orchestrator.get_status().await;
    assert!(first.generation.pod.is_none());
    assert!(first.orchestration.pod.is_none());
    let lists = harness.provider.list_calls();

    let again = harness.orchestrator.get_status().await;
    assert_eq!(harness.provider.list_calls(), lists);
    assert_eq!(again.generated_at, first.generated_at);

    harness
        .orchestrator
        .ensure(PodRole::Generation, EnsureOptions::default())
        .await
        .unwrap();

    let after = harness.orchestrator.get_status().await;
    let pod = after.generation.pod.as_ref().unwrap();
    assert!(pod.is_running());
    assert_eq!(
        after.generation.endpoint.as_deref(),
        Some(format!("https://{}-8000.proxy.runpod.net", pod.id).as_str())
    );
    assert!(after.orchestration.pod.is_none());
}

#[tokio::test(start_paused = true)]
async fn status_expires_after_ttl() {
    let harness = TestHarnessBuilder::new().build();
    harness.orchestrator.get_status().await;
    let pod = harness
        .provider
        .insert_pod("dreams-orch-20261001-120000", PodStatus::Running);

    // Listing is cached for 30s, so wait that out too.
    tokio::time::advance(Duration::from_secs(31)).await;

    let status = harness.orchestrator.get_status().await;
    assert_eq!(status.orchestration.pod.unwrap().id, pod.id);
}

#[tokio::test(start_paused = true)]
async fn status_estimates_hourly_cost_of_running_pods() {
    let harness = TestHarnessBuilder::new().build();
    assert_eq!(
        harness.orchestrator.get_status().await.estimated_hourly_cost,
        dec!(0)
    );

    let report = harness
        .orchestrator
        .start_pipeline(StartOptions::default())
        .await
        .unwrap();
    assert!(report.success);

    let status = harness.orchestrator.get_status().await;
    assert_eq!(status.estimated_hourly_cost, dec!(1.05));
    let consumer = status.consumer.unwrap();
    assert!(consumer.registered);
    assert_eq!(consumer.url, report.endpoint);
}

#[tokio::test(start_paused = true)]
async fn stopped_pods_cost_nothing() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Stopped);

    let status = harness.orchestrator.get_status().await;
    assert_eq!(status.generation.pod.unwrap().status, PodStatus::Stopped);
    assert!(status.generation.endpoint.is_none());
    assert_eq!(status.estimated_hourly_cost, dec!(0));
}

#[tokio::test(start_paused = true)]
async fn incomplete_status_is_not_cached() {
    let harness = TestHarnessBuilder::new().build();
    harness.consumer.set_unreachable(true);

    let status = harness.orchestrator.get_status().await;
    assert!(status.consumer.is_none());
    assert!(status.consumer_error.unwrap().contains("connection refused"));

    harness.orchestrator.get_status().await;
    assert_eq!(harness.log.count("consumer.status"), 2);
}

#[tokio::test(start_paused = true)]
async fn provider_outage_shows_as_lookup_error() {
    let harness = TestHarnessBuilder::new().build();
    harness.provider.set_list_failing(true);

    let status = harness.orchestrator.get_status().await;
    assert!(status.generation.pod.is_none());
    assert!(status.generation.lookup_error.is_some());
    assert!(status.orchestration.lookup_error.is_some());
    assert!(!status.is_complete());
}

#[tokio::test(start_paused = true)]
async fn status_errors_are_always_live() {
    let harness = TestHarnessBuilder::new().build();
    let cached = harness.orchestrator.get_status().await;
    assert!(cached.errors.is_empty());

    harness.provider.set_start_failing(Some(podwarden::testing::capacity_error()));
    let _ = harness
        .orchestrator
        .ensure(
            PodRole::Orchestration,
            EnsureOptions::new().max_recreate_attempts(1),
        )
        .await;

    let status = harness.orchestrator.get_status().await;
    assert!(status.errors.orchestration.is_some());
}

#[tokio::test]
async fn consumer_state_and_controls() {
    let harness = TestHarnessBuilder::new().build();
    harness
        .consumer
        .preregister("https://pod-9-8000.proxy.runpod.net");

    let report = harness.orchestrator.consumer_state().await.unwrap();
    assert_eq!(report.health["status"], "ok");
    assert_eq!(harness.log.count("consumer.health"), 1);
    assert!(report.registration.registered);
    assert_eq!(report.state["phase"], "idle");

    harness.orchestrator.abort_consumer_startup().await.unwrap();
    let report = harness.orchestrator.consumer_state().await.unwrap();
    assert_eq!(report.state["phase"], "aborted");

    harness.orchestrator.clear_consumer_state().await.unwrap();
    let report = harness.orchestrator.consumer_state().await.unwrap();
    assert_eq!(report.state["phase"], "idle");
}

#[tokio::test]
async fn consumer_controls_surface_unreachable() {
    let harness = TestHarnessBuilder::new().build();
    harness.consumer.set_unreachable(true);

    assert!(harness.orchestrator.consumer_state().await.is_err());
    assert!(harness.orchestrator.abort_consumer_startup().await.is_err());
    assert!(harness.orchestrator.clear_consumer_state().await.is_err());
}

#[tokio::test]
async fn billing_sums_records_for_pod() {
    let harness = TestHarnessBuilder::new().build();
    let record = |pod: &str, amount| BillingRecord {
        time: "2026-10-01T00:00:00Z".to_string(),
        amount,
        time_billed_ms: Some(3_600_000),
        pod_id: Some(pod.to_string()),
        gpu_type_id: None,
    };
    harness.provider.set_billing(vec![
        record("pod-1", dec!(0.69)),
        record("pod-1", dec!(0.69)),
        record("pod-2", dec!(0.36)),
    ]);

    let all = harness
        .orchestrator
        .billing(&BillingFilter::default())
        .await
        .unwrap();
    assert_eq!(all.total, dec!(1.74));
    assert_eq!(all.records.len(), 3);

    let one = harness
        .orchestrator
        .billing(&BillingFilter {
            pod_id: Some("pod-1".to_string()),
            bucket: BillingBucket::Hour,
            ..BillingFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(one.total, dec!(1.38));
}

#[tokio::test(start_paused = true)]
async fn refresh_bypasses_the_cache() {
    let harness = TestHarnessBuilder::new().build();
    harness.orchestrator.get_status().await;
    let pod = harness
        .provider
        .insert_pod("dreams-gen-20261001-120000", PodStatus::Running);

    assert!(harness.orchestrator.get_status().await.generation.pod.is_none());
    let status = harness.orchestrator.refresh_status().await;
    assert_eq!(status.generation.pod.unwrap().id, pod.id);
}
