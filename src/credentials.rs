//! API-key resolution from environment or explicit parameters.
//!
//! Keys resolve lazily per provider on first use, with a fixed precedence:
//! the provider's environment variable wins over an explicitly passed
//! value; a missing key is an [`crate::error::ErrorCategory::InvalidRequest`]
//! failure naming the expected variable. Values are never logged in full;
//! only length and source may be emitted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use crate::error::{CategorizedError, ErrorCategory};

/// Where a resolved credential value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// A provider-specific environment variable.
    Environment,
    /// An explicitly passed value.
    Parameter,
    /// No source produced a value.
    None,
}

impl CredentialSource {
    /// Lower-case label for logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Parameter => "parameter",
            Self::None => "none",
        }
    }
}

/// A resolved credential for one provider.
///
/// Invariant: when `source` is not [`CredentialSource::None`], `value` is
/// non-empty.
#[derive(Clone)]
pub struct ApiKey {
    /// Provider tag this key authenticates.
    pub provider: String,
    /// The secret value. Never logged in full.
    pub value: String,
    /// Where the value came from.
    pub source: CredentialSource,
    /// The environment variable consulted, when `source` is environment.
    pub environment_variable: Option<String>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("provider", &self.provider)
            .field("value", &"[REDACTED]")
            .field("length", &self.value.len())
            .field("source", &self.source.label())
            .finish()
    }
}

impl ApiKey {
    /// Length-and-source description safe for logs and audit outputs.
    pub fn masked(&self) -> String {
        format!("{} chars from {}", self.value.len(), self.source.label())
    }
}

// ---------------------------------------------------------------------------
// Environment snapshot
// ---------------------------------------------------------------------------

/// Snapshot of credential-bearing environment variables.
///
/// Built once at startup from the process environment, optionally layered
/// over a `.env`-style file (process environment wins). Tests construct one
/// from a plain map.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map (for testing).
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Snapshot the current process environment.
    pub fn from_process_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Layer a `.env` file underneath the snapshot.
    ///
    /// Existing (process-environment) entries win over file entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has group/world-readable
    /// permissions on Unix, or cannot be parsed.
    pub fn with_env_file(mut self, path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "credentials file does not exist: {}",
                path.display()
            ));
        }

        validate_private_permissions(path)?;

        let iter = dotenvy::from_path_iter(path)
            .with_context(|| format!("failed to read credentials at {}", path.display()))?;
        for item in iter {
            let (key, value) = item.with_context(|| {
                format!(
                    "failed to parse key-value entry in credentials file {}",
                    path.display()
                )
            })?;
            self.vars.entry(key).or_insert(value);
        }

        Ok(self)
    }

    /// Returns a value for a key, if present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns all non-empty values for redaction registration.
    pub fn known_secrets(&self) -> Vec<String> {
        self.vars
            .values()
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The environment variable conventionally holding a provider's key.
///
/// Known providers use their established names; any other provider `p`
/// maps to `<UPPER(P)>_API_KEY`.
pub fn env_var_for(provider: &str) -> String {
    match provider {
        "openai" => "OPENAI_API_KEY".to_owned(),
        "gemini" => "GEMINI_API_KEY".to_owned(),
        "openrouter" => "OPENROUTER_API_KEY".to_owned(),
        other => format!("{}_API_KEY", other.to_uppercase()),
    }
}

/// Conventional key prefix per provider, used for the advisory shape check.
fn conventional_prefix(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("sk-"),
        "openrouter" => Some("sk-or"),
        "gemini" => Some("AIza"),
        _ => None,
    }
}

/// Resolve a credential for a provider.
///
/// Precedence, highest first: the provider's environment variable, then the
/// explicitly passed value. An empty or unset environment variable falls
/// through to the explicit value. The shape check is advisory only: a
/// missing conventional prefix logs a warning, never an error. Adapters may
/// still hard-reject a shape they cannot use.
///
/// # Errors
///
/// Returns [`ErrorCategory::InvalidRequest`] naming the expected variable
/// when no source provides a value.
pub fn resolve_api_key(
    credentials: &Credentials,
    provider: &str,
    explicit: Option<&str>,
) -> Result<ApiKey, CategorizedError> {
    let var = env_var_for(provider);

    if let Some(value) = credentials.get(&var) {
        debug!(provider, var = %var, "using credential from environment");
        let key = ApiKey {
            provider: provider.to_owned(),
            value: value.to_owned(),
            source: CredentialSource::Environment,
            environment_variable: Some(var),
        };
        advise_on_shape(&key);
        return Ok(key);
    }

    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        debug!(provider, "using explicitly passed credential");
        let key = ApiKey {
            provider: provider.to_owned(),
            value: value.to_owned(),
            source: CredentialSource::Parameter,
            environment_variable: None,
        };
        advise_on_shape(&key);
        return Ok(key);
    }

    Err(CategorizedError::new(
        ErrorCategory::InvalidRequest,
        format!("no API key found for provider '{provider}'"),
    )
    .with_provider(provider)
    .with_suggestion(format!("set the {var} environment variable")))
}

fn advise_on_shape(key: &ApiKey) {
    if let Some(prefix) = conventional_prefix(&key.provider) {
        if !key.value.starts_with(prefix) {
            warn!(
                provider = %key.provider,
                expected_prefix = prefix,
                length = key.value.len(),
                "API key does not match the provider's conventional prefix"
            );
        }
    }
}
