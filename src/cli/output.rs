//! Plain-text rendering for CLI output.

use std::fmt::Write;

use crate::ledger::{ErrorRecord, ErrorSnapshot};
use crate::lifecycle::LifecycleResult;
use crate::orchestrator::{BillingSummary, RoleStatus, StatusReport};
use crate::pipeline::{SequenceReport, StepStatus};

pub fn format_status(status: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pipeline status ({})", status.generated_at.to_rfc3339());
    write_role(&mut out, &status.generation);
    write_role(&mut out, &status.orchestration);

    match (&status.consumer, &status.consumer_error) {
        (Some(reg), _) if reg.registered => {
            let _ = writeln!(
                out,
                "  consumer: registered {}{}",
                reg.url.as_deref().unwrap_or("-"),
                match reg.connected {
                    Some(true) => " (connected)",
                    Some(false) => " (not connected)",
                    None => "",
                }
            );
        }
        (Some(_), _) => {
            let _ = writeln!(out, "  consumer: no endpoint registered");
        }
        (None, Some(err)) => {
            let _ = writeln!(out, "  consumer: unavailable ({err})");
        }
        (None, None) => {
            let _ = writeln!(out, "  consumer: unknown");
        }
    }
    let _ = writeln!(out, "  est. cost: ${}/hr", status.estimated_hourly_cost.round_dp(2));

    if !status.errors.is_empty() {
        out.push_str(&format_errors(&status.errors));
    }
    out
}

fn write_role(out: &mut String, role: &RoleStatus) {
    match (&role.pod, &role.lookup_error) {
        (Some(pod), _) => {
            let gpu = pod
                .gpu
                .as_ref()
                .map(|g| format!(" {}x {}", g.count, g.type_id))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<14} {} {} [{}]{}",
                format!("{}:", role.role),
                pod.id,
                pod.name,
                pod.status,
                gpu
            );
            if let Some(ref url) = role.endpoint {
                let _ = writeln!(out, "  {:<14} {}", "", url);
            }
        }
        (None, Some(err)) => {
            let _ = writeln!(out, "  {:<14} lookup failed: {}", format!("{}:", role.role), err);
        }
        (None, None) => {
            let _ = writeln!(out, "  {:<14} no pod", format!("{}:", role.role));
        }
    }
}

pub fn format_errors(errors: &ErrorSnapshot) -> String {
    if errors.is_empty() {
        return "No recorded errors\n".to_string();
    }
    let mut out = String::from("Recent errors:\n");
    let slots: [(&str, &Option<ErrorRecord>); 3] = [
        ("generation", &errors.generation),
        ("orchestration", &errors.orchestration),
        ("pipeline", &errors.pipeline),
    ];
    for (name, record) in slots {
        if let Some(record) = record {
            let _ = writeln!(out, "  {}: {} ({})", name, record.message, record.recorded_at);
        }
    }
    out
}

pub fn format_lifecycle(result: &LifecycleResult) -> String {
    let mut out = String::new();
    let pod = result
        .pod
        .as_ref()
        .map(|p| format!("{} [{}]", p.id, p.status))
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "{} pod {}: {} after {} attempt(s)",
        result.role, pod, result.action, result.attempts
    );
    for warning in &result.warnings {
        let _ = writeln!(out, "  warning: {warning}");
    }
    out
}

pub fn format_report(report: &SequenceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Pipeline {}: {}",
        report.operation.as_str(),
        if report.success { "ok" } else { "FAILED" }
    );
    for step in &report.steps {
        let marker = match step.status {
            StepStatus::Ok => "+",
            StepStatus::Warning => "!",
            StepStatus::Failed => "x",
            StepStatus::Skipped => "-",
        };
        match step.detail {
            Some(ref detail) => {
                let _ = writeln!(out, "  {} {:<26} {}", marker, step.name, detail);
            }
            None => {
                let _ = writeln!(out, "  {} {}", marker, step.name);
            }
        }
    }
    if !report.warnings.is_empty() {
        let _ = writeln!(out, "{} warning(s)", report.warnings.len());
    }
    out
}

pub fn format_billing(summary: &BillingSummary) -> String {
    let mut out = String::new();
    for record in &summary.records {
        let _ = writeln!(
            out,
            "  {}  {:>10}  {}",
            record.time,
            format!("${}", record.amount.round_dp(2)),
            record.pod_id.as_deref().unwrap_or("-")
        );
    }
    let _ = writeln!(out, "Total: ${}", summary.total.round_dp(2));
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::{SequenceOperation, SequenceStep};

    #[test]
    fn errors_list_only_filled_slots() {
        let snapshot = ErrorSnapshot {
            generation: None,
            orchestration: Some(ErrorRecord {
                message: "no gpu".to_string(),
                detail: json!(null),
                timestamp: 0,
                recorded_at: "1970-01-01T00:00:00+00:00".to_string(),
            }),
            pipeline: None,
        };
        let text = format_errors(&snapshot);
        assert!(text.contains("orchestration: no gpu"));
        assert!(!text.contains("generation"));
        assert_eq!(format_errors(&ErrorSnapshot::default()), "No recorded errors\n");
    }

    #[test]
    fn report_marks_failed_steps() {
        let report = SequenceReport {
            operation: SequenceOperation::Start,
            success: false,
            steps: vec![
                SequenceStep {
                    name: "ensure_generation",
                    status: StepStatus::Failed,
                    detail: Some("capacity".to_string()),
                },
                SequenceStep {
                    name: "health_check",
                    status: StepStatus::Skipped,
                    detail: None,
                },
            ],
            warnings: Vec::new(),
            generation: None,
            orchestration: None,
            endpoint: None,
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        let text = format_report(&report);
        assert!(text.starts_with("Pipeline start: FAILED"));
        assert!(text.contains("x ensure_generation"));
        assert!(text.contains("- health_check"));
    }
}
