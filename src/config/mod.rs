//! Run configuration loading and validation.
//!
//! Precedence: CLI flags > environment variables > `quorum.toml` >
//! defaults. The file path comes from `$QUORUM_CONFIG_PATH` or
//! `./quorum.toml`; a missing file simply yields defaults. Environment
//! overrides go through an injectable resolver so tests never touch the
//! process environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CategorizedError, ErrorCategory};
use crate::registry::{GenerationParams, ModelSpec, Registry};

/// Default run deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Default global concurrency cap.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default per-model requests-per-minute cap.
pub const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
/// Default run-directory permissions.
pub const DEFAULT_DIR_PERMISSIONS: u32 = 0o750;
/// Default output-file permissions.
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o640;
/// Default adapter attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Default output file extension.
pub const DEFAULT_EXTENSION: &str = "md";

// ---------------------------------------------------------------------------
// Validated run configuration
// ---------------------------------------------------------------------------

/// The validated configuration one run executes under.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Primary model list, possibly with duplicates as the operator wrote
    /// them.
    pub models: Vec<String>,
    /// Optional secondary model for the synthesis stage.
    pub synthesis_model: Option<String>,
    /// Instructions text; may be empty only for dry runs.
    pub instructions: String,
    /// Parent directory for the generated run directory.
    pub output_dir: PathBuf,
    /// Run-level deadline.
    pub timeout: Duration,
    /// Global concurrency cap; 0 means unlimited.
    pub max_concurrent: usize,
    /// Per-model requests-per-minute cap; 0 means unpaced.
    pub rate_limit_rpm: u32,
    /// Treat partial success as exit 0.
    pub tolerant: bool,
    /// Validate and resolve without network calls.
    pub dry_run: bool,
    /// Path for JSON-lines audit records, none disables auditing.
    pub audit_log_file: Option<PathBuf>,
    /// Mode bits for the run directory.
    pub dir_permissions: u32,
    /// Mode bits for outcome files.
    pub file_permissions: u32,
    /// Adapter attempt budget including the first try.
    pub max_attempts: u32,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Extension of outcome files.
    pub extension: String,
    /// Parameter overrides applied over each model's defaults.
    pub parameter_overrides: GenerationParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            synthesis_model: None,
            instructions: String::new(),
            output_dir: PathBuf::from("."),
            timeout: DEFAULT_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            rate_limit_rpm: DEFAULT_RATE_LIMIT_RPM,
            tolerant: false,
            dry_run: false,
            audit_log_file: None,
            dir_permissions: DEFAULT_DIR_PERMISSIONS,
            file_permissions: DEFAULT_FILE_PERMISSIONS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            extension: DEFAULT_EXTENSION.to_owned(),
            parameter_overrides: GenerationParams::default(),
        }
    }
}

impl RunConfig {
    /// Distinct model names, first occurrence preserved for reporting
    /// order.
    pub fn distinct_models(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for model in &self.models {
            if !seen.contains(model) {
                seen.push(model.clone());
            }
        }
        seen
    }

    /// Validate the configuration against a registry and resolve every
    /// distinct model to its spec.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCategory::InvalidRequest`] for structural problems
    /// and [`ErrorCategory::NotFound`] for unknown models.
    pub fn validate(&self, registry: &Registry) -> Result<Vec<ModelSpec>, CategorizedError> {
        if !self.dry_run && self.models.is_empty() {
            return Err(CategorizedError::new(
                ErrorCategory::InvalidRequest,
                "at least one --model is required",
            ));
        }
        if !self.dry_run && self.instructions.trim().is_empty() {
            return Err(CategorizedError::new(
                ErrorCategory::InvalidRequest,
                "instructions must not be empty",
            )
            .with_suggestion("pass --instructions <file> with non-empty content"));
        }

        for mode in [self.dir_permissions, self.file_permissions] {
            if mode > 0o777 {
                return Err(CategorizedError::new(
                    ErrorCategory::InvalidRequest,
                    format!("permission mode {mode:o} is out of range"),
                ));
            }
        }

        self.parameter_overrides.validate()?;

        let mut specs = Vec::new();
        for model in self.distinct_models() {
            specs.push(registry.resolve(&model)?);
        }
        if let Some(synthesis_model) = &self.synthesis_model {
            registry.resolve(synthesis_model)?;
        }
        Ok(specs)
    }
}

// ---------------------------------------------------------------------------
// File configuration
// ---------------------------------------------------------------------------

/// Raw configuration as parsed from `quorum.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Default primary models.
    pub models: Vec<String>,
    /// Default synthesis model.
    pub synthesis_model: Option<String>,
    /// Default output parent directory.
    pub output_dir: Option<String>,
    /// Default run deadline in seconds.
    pub timeout_secs: Option<u64>,
    /// Default global concurrency cap.
    pub max_concurrent: Option<usize>,
    /// Default per-model rpm cap.
    pub rate_limit_rpm: Option<u32>,
    /// Default tolerant flag.
    pub partial_success_ok: Option<bool>,
    /// Default audit log path.
    pub audit_log_file: Option<String>,
    /// Run-directory permissions as an octal string.
    pub dir_permissions: Option<String>,
    /// Output-file permissions as an octal string.
    pub file_permissions: Option<String>,
    /// Adapter attempt budget.
    pub max_attempts: Option<u32>,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Generation parameter overrides; unknown keys are ignored.
    pub parameters: Option<toml::Table>,
}

impl FileConfig {
    /// Load with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only when a present file cannot be read or
    /// parsed; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file(|key| std::env::var(key).ok())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, using a custom env resolver for the
    /// config path (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when a present file cannot be read or parsed.
    pub fn load_from_file(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = env("QUORUM_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("quorum.toml"));
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                debug!(path = %path.display(), "loading config from file");
                let config: FileConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config file found, using defaults");
                Ok(FileConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Apply environment overrides (env > file > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("QUORUM_OUTPUT_DIR") {
            self.output_dir = Some(v);
        }
        if let Some(v) = env("QUORUM_AUDIT_LOG") {
            self.audit_log_file = Some(v);
        }
        for (key, slot) in [
            ("QUORUM_TIMEOUT_SECS", &mut self.timeout_secs),
            ("QUORUM_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs),
        ] {
            if let Some(v) = env(key) {
                match v.parse() {
                    Ok(n) => *slot = Some(n),
                    Err(_) => warn!(var = key, value = %v, "ignoring invalid env override"),
                }
            }
        }
        if let Some(v) = env("QUORUM_MAX_CONCURRENT") {
            match v.parse() {
                Ok(n) => self.max_concurrent = Some(n),
                Err(_) => {
                    warn!(var = "QUORUM_MAX_CONCURRENT", value = %v, "ignoring invalid env override");
                }
            }
        }
        if let Some(v) = env("QUORUM_RATE_LIMIT_RPM") {
            match v.parse() {
                Ok(n) => self.rate_limit_rpm = Some(n),
                Err(_) => {
                    warn!(var = "QUORUM_RATE_LIMIT_RPM", value = %v, "ignoring invalid env override");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// CLI-level overrides, already parsed but clap-free for testability.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Primary models from repeated `--model` flags.
    pub models: Vec<String>,
    /// `--synthesis-model`.
    pub synthesis_model: Option<String>,
    /// `--output-dir`.
    pub output_dir: Option<PathBuf>,
    /// `--timeout` in seconds.
    pub timeout_secs: Option<u64>,
    /// `--max-concurrent`.
    pub max_concurrent: Option<usize>,
    /// `--rate-limit`.
    pub rate_limit_rpm: Option<u32>,
    /// `--partial-success-ok`.
    pub tolerant: bool,
    /// `--dry-run`.
    pub dry_run: bool,
    /// `--audit-log-file`.
    pub audit_log_file: Option<PathBuf>,
    /// `--dir-permissions`, already parsed from octal.
    pub dir_permissions: Option<u32>,
    /// `--file-permissions`, already parsed from octal.
    pub file_permissions: Option<u32>,
}

/// Merge file config, CLI overrides, and the loaded instructions text
/// into a run configuration.
///
/// # Errors
///
/// Returns [`ErrorCategory::InvalidRequest`] when an octal permission
/// string in the file cannot be parsed.
pub fn merge(
    file: FileConfig,
    overrides: Overrides,
    instructions: String,
) -> Result<RunConfig, CategorizedError> {
    let defaults = RunConfig::default();

    let dir_permissions = match (&overrides.dir_permissions, &file.dir_permissions) {
        (Some(mode), _) => *mode,
        (None, Some(text)) => parse_octal(text)?,
        (None, None) => defaults.dir_permissions,
    };
    let file_permissions = match (&overrides.file_permissions, &file.file_permissions) {
        (Some(mode), _) => *mode,
        (None, Some(text)) => parse_octal(text)?,
        (None, None) => defaults.file_permissions,
    };

    Ok(RunConfig {
        models: if overrides.models.is_empty() {
            file.models
        } else {
            overrides.models
        },
        synthesis_model: overrides.synthesis_model.or(file.synthesis_model),
        instructions,
        output_dir: overrides
            .output_dir
            .or(file.output_dir.map(PathBuf::from))
            .unwrap_or(defaults.output_dir),
        timeout: overrides
            .timeout_secs
            .or(file.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        max_concurrent: overrides
            .max_concurrent
            .or(file.max_concurrent)
            .unwrap_or(defaults.max_concurrent),
        rate_limit_rpm: overrides
            .rate_limit_rpm
            .or(file.rate_limit_rpm)
            .unwrap_or(defaults.rate_limit_rpm),
        tolerant: overrides.tolerant || file.partial_success_ok.unwrap_or(false),
        dry_run: overrides.dry_run,
        audit_log_file: overrides
            .audit_log_file
            .or(file.audit_log_file.map(PathBuf::from)),
        dir_permissions,
        file_permissions,
        max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
        request_timeout: file
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout),
        extension: defaults.extension,
        parameter_overrides: file
            .parameters
            .as_ref()
            .map(params_from_table)
            .unwrap_or_default(),
    })
}

/// Parse a permission string like `750` or `0o750` as octal mode bits.
///
/// # Errors
///
/// Returns [`ErrorCategory::InvalidRequest`] for non-octal input.
pub fn parse_octal(text: &str) -> Result<u32, CategorizedError> {
    let trimmed = text.trim().trim_start_matches("0o");
    u32::from_str_radix(trimmed, 8).map_err(|_| {
        CategorizedError::new(
            ErrorCategory::InvalidRequest,
            format!("invalid octal permission string: {text}"),
        )
    })
}

/// Extract generation parameters from a TOML table.
///
/// Both `max_tokens` and `max_output_tokens` are accepted, the former
/// winning when both are present; unknown keys are ignored with a debug
/// log.
pub fn params_from_table(table: &toml::Table) -> GenerationParams {
    const KNOWN: [&str; 6] = [
        "temperature",
        "top_p",
        "max_tokens",
        "max_output_tokens",
        "presence_penalty",
        "frequency_penalty",
    ];
    for key in table.keys() {
        if !KNOWN.contains(&key.as_str()) {
            debug!(key = %key, "ignoring unknown generation parameter");
        }
    }

    let float = |key: &str| -> Option<f64> {
        table.get(key).and_then(|v| match v {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(i) => i32::try_from(*i).ok().map(f64::from),
            _ => None,
        })
    };
    let unsigned = |key: &str| -> Option<u32> {
        table
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|i| u32::try_from(i).ok())
    };

    GenerationParams {
        temperature: float("temperature"),
        top_p: float("top_p"),
        max_tokens: unsigned("max_tokens").or_else(|| unsigned("max_output_tokens")),
        presence_penalty: float("presence_penalty"),
        frequency_penalty: float("frequency_penalty"),
    }
}
