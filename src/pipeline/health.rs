//! Readiness polling for a freshly started endpoint.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::consumer::HealthProbe;

/// Result of polling an endpoint until it answers or time runs out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthOutcome {
    pub healthy: bool,
    pub checks: u32,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Last unexpected probe error, if any.
    pub last_error: Option<String>,
}

/// Poll `url` every `interval` until it reports healthy or `timeout` passes.
///
/// Never fails: a timeout is reported through `healthy == false`.
pub async fn wait_for_healthy(
    probe: &dyn HealthProbe,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> HealthOutcome {
    let start = Instant::now();
    let mut checks = 0;
    let mut last_error = None;

    tracing::info!("Waiting up to {:?} for {} to become healthy", timeout, url);

    loop {
        checks += 1;
        // A check still in flight at the deadline counts as a failed wait.
        let remaining = timeout.saturating_sub(start.elapsed());
        let Ok(result) = tokio::time::timeout(remaining, probe.probe(url)).await else {
            tracing::debug!("{} gave no answer within {:?}", url, remaining);
            last_error = Some(format!("no answer within {:?}", remaining));
            break;
        };
        match result {
            Ok(true) => {
                tracing::info!("{} healthy after {} checks", url, checks);
                return HealthOutcome {
                    healthy: true,
                    checks,
                    elapsed: start.elapsed(),
                    last_error,
                };
            }
            Ok(false) => tracing::debug!("{} not ready yet (check {})", url, checks),
            Err(e) => {
                tracing::trace!("Health check error: {}", e);
                last_error = Some(e.to_string());
            }
        }

        if start.elapsed() + interval > timeout {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    tracing::warn!("{} not healthy after {:?} ({} checks)", url, timeout, checks);
    HealthOutcome {
        healthy: false,
        checks,
        elapsed: start.elapsed(),
        last_error,
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ConsumerError;
    use crate::testing::StubHealthProbe;

    /// Endpoint that accepts the connection and never answers.
    struct StalledHealthCheck;

    #[async_trait]
    impl HealthProbe for StalledHealthCheck {
        async fn probe(&self, _url: &str) -> Result<bool, ConsumerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_healthy_after_a_few_checks() {
        let probe = StubHealthProbe::healthy_after(3);
        let outcome = wait_for_healthy(
            &probe,
            "http://pod/health",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;

        assert!(outcome.healthy);
        assert_eq!(outcome.checks, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_error() {
        let probe = StubHealthProbe::never_healthy();
        let outcome = wait_for_healthy(
            &probe,
            "http://pod/health",
            Duration::from_secs(20),
            Duration::from_secs(5),
        )
        .await;

        assert!(!outcome.healthy);
        // Checks at 0, 5, 10, 15 and 20 seconds.
        assert_eq!(outcome.checks, 5);
        assert!(outcome.elapsed <= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_check_stops_at_the_deadline() {
        let outcome = wait_for_healthy(
            &StalledHealthCheck,
            "http://pod/health",
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .await;

        assert!(!outcome.healthy);
        assert_eq!(outcome.checks, 1);
        assert!(outcome.elapsed <= Duration::from_secs(30));
        assert!(outcome.last_error.unwrap().contains("no answer"));
    }
}
