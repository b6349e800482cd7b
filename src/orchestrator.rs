//! Orchestration: fan one prompt out to every requested model, collect
//! outcomes, drive synthesis, and compute the aggregate status.
//!
//! One job is launched per distinct model. Jobs run concurrently under the
//! rate limiter; the collector is the only writer of the result set, and
//! outcomes keep the input order no matter when jobs finish. Failures
//! inside a job become failure outcomes, never orchestrator aborts; only
//! setup failures (validation, credentials, run directory) abort before
//! any job starts.

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink, AuditStatus};
use crate::config::RunConfig;
use crate::error::{CategorizedError, ErrorCategory};
use crate::exit::{self, AggregateStatus};
use crate::limiter::RateLimiter;
use crate::outcome::{process, Outcome, ResultSet};
use crate::output::OutputWriter;
use crate::providers::{distinct_providers, ProviderSource};
use crate::registry::{GenerationParams, ModelSpec, Registry};
use crate::synthesis::build_synthesis_prompt;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// Run-scoped correlation identifier.
    pub correlation_id: String,
    /// The run directory, none for runs that wrote nothing.
    pub run_dir: Option<PathBuf>,
    /// Primary outcomes in input order.
    pub results: ResultSet,
    /// The synthesis model, when one was configured.
    pub synthesis_model: Option<String>,
    /// The synthesis outcome, when the stage ran.
    pub synthesis: Option<Outcome>,
    /// Aggregate status over primaries and synthesis.
    pub aggregate: AggregateStatus,
}

impl RunSummary {
    /// Failure categories of primaries and synthesis, input order first.
    pub fn failure_categories(&self) -> Vec<ErrorCategory> {
        let mut categories = self.results.failure_categories();
        if let Some(category) = self.synthesis.as_ref().and_then(Outcome::category) {
            categories.push(category);
        }
        categories
    }

    /// The sanitized message of the failure that decides the exit code.
    pub fn failure_summary(&self) -> Option<String> {
        let categories = self.failure_categories();
        if categories.is_empty() {
            return None;
        }
        let deciding = exit::exit_code(AggregateStatus::AllFailed, false, &categories);

        let decides = |outcome: &Outcome| {
            outcome
                .category()
                .is_some_and(|c| exit::code_for_category(c) == deciding)
        };
        for (_, outcome) in self.results.iter() {
            if decides(outcome) {
                return outcome.failure_message();
            }
        }
        if let Some(outcome) = self.synthesis.as_ref().filter(|o| decides(o)) {
            return outcome.failure_message();
        }
        self.results
            .iter()
            .find_map(|(_, o)| o.failure_message())
            .or_else(|| self.synthesis.as_ref().and_then(Outcome::failure_message))
    }
}

/// Per-model token budget line of a dry run.
#[derive(Debug, Clone)]
pub struct DryRunEntry {
    /// Model name.
    pub model: String,
    /// Provider tag.
    pub provider: String,
    /// Estimated prompt tokens.
    pub prompt_tokens: u64,
    /// The model's input token limit.
    pub input_limit: u32,
    /// Whether the prompt fits the input limit.
    pub fits: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Schedules per-model jobs and assembles the run summary.
pub struct Orchestrator {
    config: RunConfig,
    registry: Arc<Registry>,
    factory: Arc<dyn ProviderSource>,
    limiter: Arc<RateLimiter>,
    writer: Arc<OutputWriter>,
    audit: Arc<dyn AuditSink>,
}

/// Shared, read-only state every worker needs.
struct JobEnv {
    prompt: Arc<str>,
    overrides: GenerationParams,
    run_dir: PathBuf,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    limiter: Arc<RateLimiter>,
    factory: Arc<dyn ProviderSource>,
    writer: Arc<OutputWriter>,
    audit: Arc<dyn AuditSink>,
    correlation_id: String,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        config: RunConfig,
        registry: Arc<Registry>,
        factory: Arc<dyn ProviderSource>,
        limiter: Arc<RateLimiter>,
        writer: Arc<OutputWriter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
            limiter,
            writer,
            audit,
        }
    }

    /// Execute the run: validate, resolve credentials, fan out, collect,
    /// synthesize.
    ///
    /// `prompt` is the frozen instructions-plus-context text. Job
    /// failures land in the summary; only setup failures abort.
    ///
    /// # Errors
    ///
    /// Returns a [`CategorizedError`] for failures before any job starts.
    pub async fn run(
        &self,
        prompt: &str,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CategorizedError> {
        let specs = self.preflight(correlation_id)?;

        let deadline = Instant::now().checked_add(self.config.timeout);
        let run_dir = self
            .writer
            .create_run_dir(&mut StdRng::from_entropy())?;
        info!(run_dir = %run_dir.display(), models = specs.len(), "run started");

        let env = Arc::new(JobEnv {
            prompt: Arc::from(prompt),
            overrides: self.config.parameter_overrides,
            run_dir: run_dir.clone(),
            deadline,
            cancel: cancel.clone(),
            limiter: Arc::clone(&self.limiter),
            factory: Arc::clone(&self.factory),
            writer: Arc::clone(&self.writer),
            audit: Arc::clone(&self.audit),
            correlation_id: correlation_id.to_owned(),
        });

        // Jobs start in input order and may finish in any order; awaiting
        // the handles in spawn order keeps the result set stable.
        let handles: Vec<_> = specs
            .iter()
            .map(|spec| {
                let env = Arc::clone(&env);
                let spec = spec.clone();
                tokio::spawn(run_job(env, spec))
            })
            .collect();

        let mut results = ResultSet::new();
        for (spec, handle) in specs.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failure(CategorizedError::new(
                    ErrorCategory::Unknown,
                    format!("worker for {} aborted: {e}", spec.name),
                )),
            };
            results.insert(spec.name.clone(), outcome);
        }

        let synthesis = match &self.config.synthesis_model {
            Some(model) if !results.successes().is_empty() => Some(
                self.run_synthesis(model, &results, &env).await,
            ),
            Some(model) => {
                warn!(model = %model, "skipping synthesis: no successful primary outcome");
                None
            }
            None => None,
        };

        let aggregate = compute_aggregate(&results, synthesis.as_ref());
        if aggregate == AggregateStatus::PartialSuccess && self.config.tolerant {
            self.audit.record(AuditRecord::new(
                "partial_success_exit",
                AuditStatus::Success,
                correlation_id,
            ));
        }

        Ok(RunSummary {
            correlation_id: correlation_id.to_owned(),
            run_dir: Some(run_dir),
            results,
            synthesis_model: self.config.synthesis_model.clone(),
            synthesis,
            aggregate,
        })
    }

    /// Validate, resolve, and report token budgets without any network
    /// call.
    ///
    /// # Errors
    ///
    /// Same setup failure modes as [`Orchestrator::run`].
    pub fn dry_run(
        &self,
        prompt: &str,
        correlation_id: &str,
    ) -> Result<Vec<DryRunEntry>, CategorizedError> {
        let specs = self.preflight(correlation_id)?;

        let mut entries = Vec::new();
        for spec in &specs {
            let provider = self.factory.provider_for(spec)?;
            let prompt_tokens = if prompt.trim().is_empty() {
                0
            } else {
                provider.count_tokens(prompt)?
            };
            let input_limit = provider.model_info().input_tokens;
            entries.push(DryRunEntry {
                model: spec.name.clone(),
                provider: spec.provider.clone(),
                prompt_tokens,
                input_limit,
                fits: prompt_tokens <= u64::from(input_limit),
            });
        }
        Ok(entries)
    }

    /// Validation plus credential resolution, with audit records for
    /// both. Shared by real and dry runs.
    fn preflight(&self, correlation_id: &str) -> Result<Vec<ModelSpec>, CategorizedError> {
        let inputs = serde_json::json!({
            "models": self.config.models,
            "synthesis_model": self.config.synthesis_model,
            "dry_run": self.config.dry_run,
        });
        let specs = match self.config.validate(&self.registry) {
            Ok(specs) => {
                self.audit.record(
                    AuditRecord::new("validate_inputs", AuditStatus::Success, correlation_id)
                        .with_inputs(inputs),
                );
                specs
            }
            Err(e) => {
                self.audit.record(
                    AuditRecord::new("validate_inputs", AuditStatus::Failure, correlation_id)
                        .with_inputs(inputs)
                        .with_error(&e),
                );
                return Err(e);
            }
        };

        let mut resolved = Vec::new();
        for provider in distinct_providers(&specs) {
            match self.factory.preflight_credential(&provider) {
                Ok(key) => resolved.push(serde_json::json!({
                    "provider": provider,
                    "credential": key.masked(),
                })),
                Err(e) => {
                    self.audit.record(
                        AuditRecord::new(
                            "resolve_credentials",
                            AuditStatus::Failure,
                            correlation_id,
                        )
                        .with_error(&e),
                    );
                    return Err(e);
                }
            }
        }
        self.audit.record(
            AuditRecord::new("resolve_credentials", AuditStatus::Success, correlation_id)
                .with_outputs(serde_json::Value::Array(resolved)),
        );

        Ok(specs)
    }

    /// Run the synthesis stage over the successful primaries.
    async fn run_synthesis(
        &self,
        model: &str,
        results: &ResultSet,
        env: &Arc<JobEnv>,
    ) -> Outcome {
        self.audit.record(
            AuditRecord::new("synthesis", AuditStatus::InProgress, &env.correlation_id)
                .with_inputs(serde_json::json!({
                    "model": model,
                    "source_count": results.successes().len(),
                })),
        );

        let spec = match self.registry.resolve(model) {
            Ok(spec) => spec,
            Err(e) => return self.finish_synthesis(env, Outcome::Failure(e)),
        };
        let prompt = build_synthesis_prompt(&self.config.instructions, &results.successes());
        let params = spec.default_parameters.merged(env.overrides);

        let outcome = execute_generate(env, &spec, Arc::from(prompt.as_str()), params).await;
        let outcome = match outcome {
            Outcome::Success {
                content,
                tokens,
                truncated,
            } => match env.writer.write_synthesis(&env.run_dir, model, &content) {
                Ok(path) => {
                    debug!(path = %path.display(), "synthesis artifact written");
                    Outcome::Success {
                        content,
                        tokens,
                        truncated,
                    }
                }
                Err(e) => Outcome::Failure(e),
            },
            other => other,
        };
        self.finish_synthesis(env, outcome)
    }

    fn finish_synthesis(&self, env: &Arc<JobEnv>, outcome: Outcome) -> Outcome {
        let status = if outcome.is_success() {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        };
        let mut record = AuditRecord::new("synthesis", status, &env.correlation_id);
        if let Some(category) = outcome.category() {
            record = record.with_outputs(serde_json::json!({
                "category": category.label(),
            }));
        }
        self.audit.record(record);
        outcome
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// One worker: audit, rate-limit, generate, persist.
async fn run_job(env: Arc<JobEnv>, spec: ModelSpec) -> Outcome {
    env.audit.record(
        AuditRecord::new(
            "model_invocation",
            AuditStatus::InProgress,
            &env.correlation_id,
        )
        .with_inputs(serde_json::json!({
            "model": spec.name,
            "provider": spec.provider,
        })),
    );

    let params = spec.default_parameters.merged(env.overrides);
    let outcome = execute_generate(&env, &spec, Arc::clone(&env.prompt), params).await;

    // Failures produce no file, only the audit record below.
    let outcome = match outcome {
        Outcome::Success {
            content,
            tokens,
            truncated,
        } => match env.writer.write_output(&env.run_dir, &spec.name, &content) {
            Ok(path) => {
                env.audit.record(
                    AuditRecord::new(
                        "model_invocation",
                        AuditStatus::Success,
                        &env.correlation_id,
                    )
                    .with_inputs(serde_json::json!({"model": spec.name}))
                    .with_outputs(serde_json::json!({
                        "tokens": tokens,
                        "truncated": truncated,
                        "file": path.display().to_string(),
                    })),
                );
                return Outcome::Success {
                    content,
                    tokens,
                    truncated,
                };
            }
            Err(e) => Outcome::Failure(e),
        },
        other => other,
    };

    let mut record = AuditRecord::new(
        "model_invocation",
        AuditStatus::Failure,
        &env.correlation_id,
    )
    .with_inputs(serde_json::json!({"model": spec.name}));
    if let Outcome::Failure(err) = &outcome {
        record = record.with_error(err);
    } else if let Some(category) = outcome.category() {
        record = record.with_outputs(serde_json::json!({"category": category.label()}));
    }
    env.audit.record(record);
    outcome
}

/// Acquire the limiter, call the adapter, canonicalize the result.
///
/// Cancellation and the run deadline are observed at every suspension
/// point: the limiter wait, the HTTP call, and the response read all sit
/// inside the raced future.
async fn execute_generate(
    env: &Arc<JobEnv>,
    spec: &ModelSpec,
    prompt: Arc<str>,
    params: GenerationParams,
) -> Outcome {
    let work = async {
        let _permit = env.limiter.acquire(&spec.name, &env.cancel).await?;
        let provider = env.factory.provider_for(spec)?;
        provider.generate(&prompt, &params, env.deadline).await
    };

    let raw = tokio::select! {
        () = env.cancel.cancelled() => {
            return Outcome::Failure(CategorizedError::cancelled(format!(
                "run cancelled before {} finished",
                spec.name
            )));
        }
        () = until(env.deadline) => {
            return Outcome::Failure(CategorizedError::cancelled(format!(
                "run deadline elapsed before {} finished",
                spec.name
            )));
        }
        result = work => match result {
            Ok(raw) => raw,
            Err(e) => return Outcome::Failure(e),
        },
    };

    process(raw)
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Aggregate over the primaries and the optional synthesis outcome.
///
/// A synthesis failure caps the aggregate at partial success even when
/// every primary succeeded.
fn compute_aggregate(results: &ResultSet, synthesis: Option<&Outcome>) -> AggregateStatus {
    if results.is_empty() {
        return AggregateStatus::AllSuccess;
    }
    if results.all_failed() {
        return AggregateStatus::AllFailed;
    }
    let synthesis_failed = synthesis.is_some_and(|outcome| !outcome.is_success());
    if results.all_succeeded() && !synthesis_failed {
        AggregateStatus::AllSuccess
    } else {
        AggregateStatus::PartialSuccess
    }
}
