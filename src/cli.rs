//! Command-line surface.
//!
//! A thin wrapper around the core: flags parse here, get merged with the
//! optional config file, and hand a validated [`crate::config::RunConfig`]
//! to the orchestrator.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{parse_octal, Overrides};
use crate::error::CategorizedError;

/// Fan one prompt out to many LLM endpoints in parallel, collect the
/// answers, and optionally synthesize them.
#[derive(Debug, Parser)]
#[command(name = "quorum", version, about)]
pub struct Cli {
    /// Path to the instructions text; required unless --dry-run.
    #[arg(long)]
    pub instructions: Option<PathBuf>,

    /// Primary model; repeat for several models.
    #[arg(long = "model")]
    pub models: Vec<String>,

    /// Secondary model that synthesizes the primary answers.
    #[arg(long)]
    pub synthesis_model: Option<String>,

    /// Files or directories gathered into the context block; repeatable.
    #[arg(long = "context")]
    pub context_paths: Vec<PathBuf>,

    /// Comma-separated extensions to keep when gathering context.
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Comma-separated path substrings to drop when gathering context.
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Parent directory for the generated run directory.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Run-level deadline in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Global concurrency cap; 0 means unlimited.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Per-model requests-per-minute cap; 0 means unpaced.
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Treat partial success as exit 0.
    #[arg(long)]
    pub partial_success_ok: bool,

    /// Validate and resolve without any network call.
    #[arg(long)]
    pub dry_run: bool,

    /// Path for JSON-lines audit records.
    #[arg(long)]
    pub audit_log_file: Option<PathBuf>,

    /// Octal mode for the run directory, e.g. 750.
    #[arg(long)]
    pub dir_permissions: Option<String>,

    /// Octal mode for outcome files, e.g. 640.
    #[arg(long)]
    pub file_permissions: Option<String>,

    /// Extra `.env`-style credential file, layered under the process
    /// environment.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Directory for rotating JSON log files; console-only when absent.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Convert the parsed flags into clap-free config overrides.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorCategory::InvalidRequest`] when a
    /// permission flag is not valid octal.
    pub fn overrides(&self) -> Result<Overrides, CategorizedError> {
        Ok(Overrides {
            models: self.models.clone(),
            synthesis_model: self.synthesis_model.clone(),
            output_dir: self.output_dir.clone(),
            timeout_secs: self.timeout,
            max_concurrent: self.max_concurrent,
            rate_limit_rpm: self.rate_limit,
            tolerant: self.partial_success_ok,
            dry_run: self.dry_run,
            audit_log_file: self.audit_log_file.clone(),
            dir_permissions: self
                .dir_permissions
                .as_deref()
                .map(parse_octal)
                .transpose()?,
            file_permissions: self
                .file_permissions
                .as_deref()
                .map(parse_octal)
                .transpose()?,
        })
    }
}
