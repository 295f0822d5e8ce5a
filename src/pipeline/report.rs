//! Step-by-step record of a pipeline run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::LifecycleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    /// Completed with a problem the run tolerates.
    Warning,
    Failed,
    /// Not attempted because an earlier step failed.
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceStep {
    pub name: &'static str,
    pub status: StepStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOperation {
    Start,
    Stop,
}

impl SequenceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Aggregated outcome of `start_pipeline` or `stop_pipeline`.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub operation: SequenceOperation,
    pub success: bool,
    pub steps: Vec<SequenceStep>,
    pub warnings: Vec<String>,
    pub generation: Option<LifecycleResult>,
    pub orchestration: Option<LifecycleResult>,
    /// Generation endpoint handed to the consumer, when registration ran.
    pub endpoint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SequenceReport {
    pub(crate) fn new(operation: SequenceOperation) -> Self {
        Self {
            operation,
            success: true,
            steps: Vec::new(),
            warnings: Vec::new(),
            generation: None,
            orchestration: None,
            endpoint: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn ok(&mut self, name: &'static str, detail: Option<String>) {
        self.push(name, StepStatus::Ok, detail);
    }

    /// Record a tolerated problem; the message also lands in `warnings`.
    pub(crate) fn warn(&mut self, name: &'static str, message: String) {
        tracing::warn!("Pipeline {} step '{}': {}", self.operation.as_str(), name, message);
        self.warnings.push(format!("{name}: {message}"));
        self.push(name, StepStatus::Warning, Some(message));
    }

    /// Record a fatal step failure and mark the run unsuccessful.
    pub(crate) fn fail(&mut self, name: &'static str, message: String) {
        tracing::error!("Pipeline {} step '{}' failed: {}", self.operation.as_str(), name, message);
        self.success = false;
        self.push(name, StepStatus::Failed, Some(message));
    }

    pub(crate) fn skip(&mut self, name: &'static str) {
        self.push(name, StepStatus::Skipped, None);
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn step(&self, name: &str) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn push(&mut self, name: &'static str, status: StepStatus, detail: Option<String>) {
        self.steps.push(SequenceStep {
            name,
            status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_keep_run_successful() {
        let mut report = SequenceReport::new(SequenceOperation::Start);
        report.ok("ensure_generation", None);
        report.warn("register_endpoint", "consumer down".to_string());
        let report = report.finish();

        assert!(report.success);
        assert_eq!(report.warnings, vec!["register_endpoint: consumer down"]);
        assert_eq!(
            report.step("register_endpoint").unwrap().status,
            StepStatus::Warning
        );
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn failure_marks_run_unsuccessful() {
        let mut report = SequenceReport::new(SequenceOperation::Start);
        report.fail("ensure_generation", "no capacity".to_string());
        report.skip("ensure_orchestration");
        assert!(!report.success);
        assert!(report.warnings.is_empty());
        assert_eq!(
            report.step("ensure_orchestration").unwrap().status,
            StepStatus::Skipped
        );
    }
}
