//! CLI command handling.
//!
//! Provides subcommands for:
//! - Inspecting the pipeline (`status --fresh`, `errors`)
//! - Driving a single role (`ensure generation --verify`)
//! - Bringing the pipeline up or down (`start`, `stop`)
//! - Billing totals (`billing --days 7`)
//! - Consumer controls (`consumer state`, `consumer clear`, `consumer abort`)

mod output;

use std::time::Duration;

use chrono::Utc;
use clap::{ColorChoice, Parser, Subcommand};

pub use output::{format_billing, format_errors, format_lifecycle, format_report, format_status};

use crate::lifecycle::EnsureOptions;
use crate::orchestrator::PodOrchestrator;
use crate::pipeline::StartOptions;
use crate::pods::PodRole;
use crate::provider::{BillingBucket, BillingFilter};

#[derive(Parser, Debug)]
#[command(name = "podwarden")]
#[command(about = "Keeps the GPU generation and orchestration pods running")]
#[command(
    long_about = "podwarden manages the two GPU pods behind the dream pipeline.\nExamples:\n  podwarden status  # Show both pods and the consumer registration\n  podwarden start   # Bring the whole pipeline up"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "PODWARDEN_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show both pods, the consumer registration and recent errors
    Status {
        /// Skip cached lookups
        #[arg(long)]
        fresh: bool,
    },

    /// Show the last recorded error per role
    Errors,

    /// Make sure one role's pod is running
    #[command(
        long_about = "Starts, creates or recreates the role's pod until it runs.\nExample: podwarden ensure generation --verify"
    )]
    Ensure {
        /// Role: generation (gen) or orchestration (orch)
        role: PodRole,

        /// Prove the pod can start, then stop it again
        #[arg(long)]
        verify: bool,

        /// Total create attempts when GPUs are unavailable
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Bring the pipeline up: generation pod, endpoint, orchestration pod
    Start {
        /// Seconds to wait for the generation pod's health check
        #[arg(long)]
        health_timeout: Option<u64>,
    },

    /// Tear the pipeline down
    Stop,

    /// Billing totals from the provider
    Billing {
        /// How many days back to include
        #[arg(long, default_value_t = 7)]
        days: i64,

        /// Only this pod
        #[arg(long)]
        pod: Option<String>,
    },

    /// Downstream consumer controls
    #[command(subcommand)]
    Consumer(ConsumerCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConsumerCommand {
    /// Show the consumer's state and endpoint registration
    State,
    /// Reset the consumer's state
    Clear,
    /// Abort a startup the consumer is running
    Abort,
}

/// Run one command and print its result.
pub async fn run_command(
    command: Command,
    orchestrator: &PodOrchestrator,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        Command::Status { fresh } => {
            let status = if fresh {
                orchestrator.refresh_status().await
            } else {
                orchestrator.get_status().await
            };
            print_output(json, &status, || format_status(&status))?;
        }
        Command::Errors => {
            let errors = orchestrator.get_errors().await;
            print_output(json, &errors, || format_errors(&errors))?;
        }
        Command::Ensure {
            role,
            verify,
            max_attempts,
        } => {
            let mut options = EnsureOptions::new().verify_only(verify);
            if let Some(n) = max_attempts {
                options = options.max_recreate_attempts(n);
            }
            let result = orchestrator.ensure(role, options).await?;
            print_output(json, &result, || format_lifecycle(&result))?;
        }
        Command::Start { health_timeout } => {
            let options = StartOptions {
                health_timeout: health_timeout.map(Duration::from_secs),
                ..StartOptions::default()
            };
            let report = orchestrator.start_pipeline(options).await?;
            print_output(json, &report, || format_report(&report))?;
            if !report.success {
                anyhow::bail!("pipeline start failed");
            }
        }
        Command::Stop => {
            let report = orchestrator.stop_pipeline().await?;
            print_output(json, &report, || format_report(&report))?;
        }
        Command::Billing { days, pod } => {
            let filter = BillingFilter {
                pod_id: pod,
                start: Some(Utc::now() - chrono::Duration::days(days.clamp(1, 3650))),
                end: None,
                bucket: BillingBucket::Day,
            };
            let summary = orchestrator.billing(&filter).await?;
            print_output(json, &summary, || format_billing(&summary))?;
        }
        Command::Consumer(ConsumerCommand::State) => {
            let state = orchestrator.consumer_state().await?;
            // Consumer state is free-form JSON; always print it as such.
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Consumer(ConsumerCommand::Clear) => {
            orchestrator.clear_consumer_state().await?;
            println!("Consumer state cleared");
        }
        Command::Consumer(ConsumerCommand::Abort) => {
            orchestrator.abort_consumer_startup().await?;
            println!("Consumer startup aborted");
        }
    }
    Ok(())
}

fn print_output<T: serde::Serialize>(
    json: bool,
    value: &T,
    text: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}
