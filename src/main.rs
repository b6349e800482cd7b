#![allow(missing_docs)]

//! Quorum binary: parse flags, assemble the prompt, run the
//! orchestration, and exit with the policy's code.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use quorum::audit::{AuditRecord, AuditSink, AuditStatus, JsonlAuditLogger, NoopAudit};
use quorum::cli::Cli;
use quorum::config::{self, FileConfig, RunConfig};
use quorum::context::{self, ContextOptions};
use quorum::credentials::Credentials;
use quorum::error::CategorizedError;
use quorum::exit::{self, AggregateStatus};
use quorum::limiter::RateLimiter;
use quorum::logging;
use quorum::orchestrator::{DryRunEntry, Orchestrator, RunSummary};
use quorum::output::OutputWriter;
use quorum::providers::{retry::RetryPolicy, ProviderFactory};
use quorum::registry::Registry;

fn main() {
    let cli = Cli::parse();

    let _logging_guard = match &cli.log_dir {
        Some(dir) => match logging::init_with_file(dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: {e:#}");
                std::process::exit(exit::EXIT_GENERIC_FAILURE);
            }
        },
        None => {
            logging::init_console();
            None
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit::EXIT_GENERIC_FAILURE
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn run(cli: Cli) -> Result<i32> {
    let correlation_id = Uuid::new_v4().to_string();

    // Configuration: CLI > env > file > defaults.
    let file_config = FileConfig::load()?;
    let overrides = match cli.overrides() {
        Ok(overrides) => overrides,
        Err(e) => return Ok(report_setup_failure(&e, false)),
    };

    let instructions = match &cli.instructions {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read instructions at {}", path.display()))?,
        None => String::new(),
    };
    let run_config = match config::merge(file_config, overrides, instructions) {
        Ok(config) => config,
        Err(e) => return Ok(report_setup_failure(&e, false)),
    };

    // Audit sink is injected; the core never opens the file itself.
    let audit: Arc<dyn AuditSink> = match &run_config.audit_log_file {
        Some(path) => Arc::new(
            JsonlAuditLogger::new(path)
                .with_context(|| format!("failed to open audit log {}", path.display()))?,
        ),
        None => Arc::new(NoopAudit),
    };
    audit.record(
        AuditRecord::new("application_start", AuditStatus::InProgress, &correlation_id)
            .with_inputs(serde_json::json!({
                "models": run_config.models,
                "synthesis_model": run_config.synthesis_model,
                "dry_run": run_config.dry_run,
                "tolerant": run_config.tolerant,
            })),
    );

    let code = execute(&cli, run_config, Arc::clone(&audit), &correlation_id).await;

    let status = match &code {
        Ok(0) => AuditStatus::Success,
        _ => AuditStatus::Failure,
    };
    let mut end = AuditRecord::new("application_end", status, &correlation_id);
    if let Ok(exit_code) = &code {
        end = end.with_outputs(serde_json::json!({"exit_code": exit_code}));
    }
    audit.record(end);

    code
}

async fn execute(
    cli: &Cli,
    run_config: RunConfig,
    audit: Arc<dyn AuditSink>,
    correlation_id: &str,
) -> Result<i32> {
    // Credential snapshot: process env over the optional --env-file.
    let mut credentials = Credentials::from_process_env();
    if let Some(env_file) = &cli.env_file {
        credentials = credentials.with_env_file(env_file)?;
    }

    // Context gathering happens before any network traffic; the prompt
    // is immutable for the rest of the run.
    let context_options = ContextOptions {
        include_extensions: cli.include.clone(),
        exclude_substrings: cli.exclude.clone(),
    };
    let rendered = context::gather(&cli.context_paths, &context_options)?;
    if rendered.file_count > 0 {
        info!(
            files = rendered.file_count,
            bytes = rendered.total_bytes,
            "context gathered"
        );
    }
    let prompt = context::assemble_prompt(&run_config.instructions, &rendered);

    let registry = Arc::new(Registry::builtin());
    let retry = RetryPolicy {
        max_attempts: run_config.max_attempts,
        ..RetryPolicy::default()
    };
    let factory = match ProviderFactory::new(credentials, run_config.request_timeout, retry) {
        Ok(factory) => Arc::new(factory),
        Err(e) => return Ok(report_setup_failure(&e, run_config.tolerant)),
    };
    let limiter = Arc::new(RateLimiter::new(
        run_config.max_concurrent,
        run_config.rate_limit_rpm,
    ));
    let writer = Arc::new(OutputWriter::new(
        run_config.output_dir.clone(),
        run_config.dir_permissions,
        run_config.file_permissions,
        run_config.extension.clone(),
    ));

    let tolerant = run_config.tolerant;
    let dry_run = run_config.dry_run;
    let orchestrator = Orchestrator::new(run_config, registry, factory, limiter, writer, audit);

    if dry_run {
        return match orchestrator.dry_run(&prompt, correlation_id) {
            Ok(entries) => {
                print_dry_run(&entries);
                Ok(exit::EXIT_OK)
            }
            Err(e) => Ok(report_setup_failure(&e, tolerant)),
        };
    }

    // Ctrl-C cancels the run; in-flight jobs observe it at their next
    // suspension point and record Cancelled outcomes.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    match orchestrator.run(&prompt, correlation_id, &cancel).await {
        Ok(summary) => {
            print_summary(&summary);
            if let Some(line) = summary.failure_summary() {
                eprintln!("Error: {line}");
            }
            Ok(exit::exit_code(
                summary.aggregate,
                tolerant,
                &summary.failure_categories(),
            ))
        }
        Err(e) => Ok(report_setup_failure(&e, tolerant)),
    }
}

/// Setup failures abort before any job starts; the aggregate is all-failed
/// by definition.
fn report_setup_failure(err: &CategorizedError, tolerant: bool) -> i32 {
    eprintln!("Error: {}", err.summary_line());
    exit::exit_code(AggregateStatus::AllFailed, tolerant, &[err.category])
}

fn print_summary(summary: &RunSummary) {
    if let Some(dir) = &summary.run_dir {
        println!("run directory: {}", dir.display());
    }
    for (model, outcome) in summary.results.iter() {
        match outcome.failure_message() {
            None => println!("{model}: ok"),
            Some(message) => println!("{model}: failed: {message}"),
        }
    }
    if let (Some(model), Some(outcome)) = (&summary.synthesis_model, &summary.synthesis) {
        match outcome.failure_message() {
            None => println!("{model} (synthesis): ok"),
            Some(message) => println!("{model} (synthesis): failed: {message}"),
        }
    }
}

fn print_dry_run(entries: &[DryRunEntry]) {
    if entries.is_empty() {
        println!("dry run: nothing to do (no models requested)");
        return;
    }
    println!("dry run: no requests were sent");
    for entry in entries {
        let verdict = if entry.fits { "fits" } else { "TOO LARGE" };
        println!(
            "{} [{}]: ~{} prompt tokens of {} ({verdict})",
            entry.model, entry.provider, entry.prompt_tokens, entry.input_limit
        );
    }
}
