//! Provider adapter layer.
//!
//! Defines the [`ModelProvider`] trait and the shared raw-result types used
//! by all adapter implementations.
//!
//! Two adapters are implemented:
//! - [`openai::OpenAiProvider`] — OpenAI-compatible `/chat/completions`
//!   wire format; also serves OpenRouter with its base URL and key-shape
//!   rule
//! - [`gemini::GeminiProvider`] — Google `generateContent` API
//!
//! The [`ProviderFactory`] instantiates one adapter per model, resolves the
//! provider credential on first use, and shares one pooled HTTP client
//! across every adapter it builds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::credentials::{resolve_api_key, Credentials};
use crate::error::{classify_status, classify_text, CategorizedError, ErrorCategory};
use crate::registry::{GenerationParams, ModelSpec};

pub mod gemini;
pub mod openai;
pub mod retry;

/// Idle pooled connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// How long an idle pooled connection may linger.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

// ---------------------------------------------------------------------------
// Raw result types
// ---------------------------------------------------------------------------

/// One safety assessment entry reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyInfo {
    /// Remote-specific category label.
    pub category: String,
    /// Whether the remote blocked the content for this category.
    pub blocked: bool,
}

/// The raw result of one generation call, before canonicalization.
#[derive(Debug, Clone, Default)]
pub struct ProviderResult {
    /// Generated text, possibly empty.
    pub content: String,
    /// Finish reason exactly as the remote returned it.
    pub finish_reason: String,
    /// Tokens generated, 0 when the remote did not report usage.
    pub token_count: u64,
    /// True iff the finish reason indicates a length cutoff.
    pub truncated: bool,
    /// Safety assessments; any blocked entry makes `content` unusable.
    pub safety_info: Vec<SafetyInfo>,
}

/// Token-limit subset of a model spec, served from the adapter cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Maximum prompt tokens.
    pub input_tokens: u32,
    /// Maximum generated tokens.
    pub output_tokens: u32,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform contract to send a prompt and receive text plus finish metadata.
///
/// Implementations own the retry loop for transient remote errors and must
/// be `Send + Sync`: one adapter instance is shared by every concurrent job
/// on the same provider, so per-call state lives in locals, never on the
/// instance.
#[async_trait]
pub trait ModelProvider: Send + Sync + std::fmt::Debug {
    /// Generate a completion for `prompt`.
    ///
    /// The prompt must be non-empty and `params` in range. Transient
    /// failures ({rate limit, server, network}) are retried internally
    /// with exponential backoff up to the configured attempt budget,
    /// never past `deadline`.
    ///
    /// # Errors
    ///
    /// Returns a [`CategorizedError`] carrying the final failure after
    /// retries are exhausted or a terminal category is observed.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Option<Instant>,
    ) -> Result<ProviderResult, CategorizedError>;

    /// Estimate prompt tokens with the provider family's local encoding.
    /// Never performs a network call.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCategory::InvalidRequest`] for an empty prompt.
    fn count_tokens(&self, prompt: &str) -> Result<u64, CategorizedError>;

    /// Cached token limits for the configured model, falling back to
    /// conservative defaults when the model is not recognized.
    fn model_info(&self) -> ModelLimits;

    /// The provider tag this adapter speaks for.
    fn provider_name(&self) -> &str;

    /// Release pooled connections. The default implementation drops the
    /// shared client reference; pools close once the last clone is gone.
    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Estimate the token count of `text` for a family with the given
/// bytes-per-token ratio.
///
/// All supported families average close to four bytes per token on prose;
/// the estimate rounds up so budget checks stay conservative.
pub fn estimate_tokens(text: &str, bytes_per_token: u64) -> u64 {
    let divisor = bytes_per_token.max(1);
    let bytes = u64::try_from(text.len()).unwrap_or(u64::MAX);
    bytes.div_ceil(divisor)
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by all adapters)
// ---------------------------------------------------------------------------

/// Build the pooled HTTP client shared by every adapter of a run.
///
/// # Errors
///
/// Returns [`ErrorCategory::Unknown`] if the TLS backend cannot
/// initialize.
pub fn shared_http_client(
    request_timeout: Duration,
) -> Result<reqwest::Client, CategorizedError> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| {
            CategorizedError::new(
                ErrorCategory::Unknown,
                format!("failed to build HTTP client: {e}"),
            )
        })
}

/// Convert a transport-level `reqwest` failure into a categorized error.
///
/// Send failures, timeouts, and body-read failures are all Network;
/// classification by message text would reach the same answer but the
/// mapping here is fixed by contract.
pub fn transport_error(provider: &str, err: reqwest::Error) -> CategorizedError {
    CategorizedError::new(
        ErrorCategory::Network,
        format!("request to {provider} failed: {err}"),
    )
    .with_provider(provider)
    .with_source(err)
}

/// Check an HTTP response and return its body text, or a categorized
/// error for non-2xx statuses.
///
/// The status code drives classification; the message text is the
/// fallback for statuses outside the fixed table. Up to 200 bytes of the
/// sanitized body are attached as details, and a `x-request-id` header is
/// carried in the structured request-id field.
///
/// # Errors
///
/// Returns Network when the body cannot be read, otherwise the category
/// classified from the status.
pub async fn check_http_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<String, CategorizedError> {
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if status.is_success() {
        return Ok(body);
    }

    let mut category = classify_status(status.as_u16());
    if category == ErrorCategory::Unknown {
        category = classify_text(&body);
    }

    Err(CategorizedError::new(
        category,
        format!("{provider} returned HTTP {}", status.as_u16()),
    )
    .with_provider(provider)
    .with_status(status.as_u16())
    .with_details(&body)
    .with_request_id(request_id))
}

/// Reject an empty prompt before any network traffic.
pub(crate) fn require_prompt(provider: &str, prompt: &str) -> Result<(), CategorizedError> {
    if prompt.trim().is_empty() {
        return Err(CategorizedError::new(
            ErrorCategory::InvalidRequest,
            "prompt must not be empty",
        )
        .with_provider(provider));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Capability to obtain adapters and pre-flight credentials.
///
/// The orchestrator depends on this trait, not on the concrete factory,
/// so tests can substitute mock providers without touching HTTP.
pub trait ProviderSource: Send + Sync {
    /// Return the adapter for a model spec, building it on first use.
    ///
    /// # Errors
    ///
    /// Fails when no credential resolves for the model's provider or the
    /// provider tag is unknown.
    fn provider_for(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelProvider>, CategorizedError>;

    /// Resolve the credential for one provider without building an
    /// adapter.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`resolve_api_key`].
    fn preflight_credential(
        &self,
        provider: &str,
    ) -> Result<crate::credentials::ApiKey, CategorizedError>;
}

/// Distinct providers of the given specs, first occurrence preserved.
pub fn distinct_providers(specs: &[ModelSpec]) -> Vec<String> {
    let mut seen = Vec::new();
    for spec in specs {
        if !seen.contains(&spec.provider) {
            seen.push(spec.provider.clone());
        }
    }
    seen
}

/// Builds and caches one adapter per model.
///
/// Credentials resolve lazily per provider on first use; the pooled HTTP
/// client is shared across all adapters the factory builds. The cache is
/// keyed by model name because adapters carry their model's token limits.
pub struct ProviderFactory {
    credentials: Credentials,
    client: reqwest::Client,
    retry: retry::RetryPolicy,
    cache: Mutex<HashMap<String, Arc<dyn ModelProvider>>>,
}

impl ProviderFactory {
    /// Create a factory over a credential snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(
        credentials: Credentials,
        request_timeout: Duration,
        retry: retry::RetryPolicy,
    ) -> Result<Self, CategorizedError> {
        Ok(Self {
            credentials,
            client: shared_http_client(request_timeout)?,
            retry,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached_provider_for(
        &self,
        spec: &ModelSpec,
    ) -> Result<Arc<dyn ModelProvider>, CategorizedError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| CategorizedError::new(ErrorCategory::Unknown, "factory lock poisoned"))?;
        if let Some(provider) = cache.get(&spec.name) {
            return Ok(Arc::clone(provider));
        }

        let adapter = self.build(spec)?;
        cache.insert(spec.name.clone(), Arc::clone(&adapter));
        Ok(adapter)
    }

    fn build(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelProvider>, CategorizedError> {
        let key = resolve_api_key(&self.credentials, &spec.provider, None)?;
        let limits = ModelLimits {
            input_tokens: spec.input_token_limit,
            output_tokens: spec.output_token_limit,
        };

        match spec.provider.as_str() {
            "openai" => Ok(Arc::new(openai::OpenAiProvider::openai(
                spec.name.clone(),
                key.value,
                limits,
                self.client.clone(),
                self.retry,
            ))),
            "openrouter" => Ok(Arc::new(openai::OpenAiProvider::openrouter(
                spec.name.clone(),
                key.value,
                limits,
                self.client.clone(),
                self.retry,
            )?)),
            "gemini" => Ok(Arc::new(gemini::GeminiProvider::new(
                spec.name.clone(),
                key.value,
                limits,
                self.client.clone(),
                self.retry,
            ))),
            other => Err(CategorizedError::new(
                ErrorCategory::NotFound,
                format!("no adapter for provider '{other}'"),
            )
            .with_provider(other)),
        }
    }
}

impl ProviderSource for ProviderFactory {
    fn provider_for(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelProvider>, CategorizedError> {
        self.cached_provider_for(spec)
    }

    fn preflight_credential(
        &self,
        provider: &str,
    ) -> Result<crate::credentials::ApiKey, CategorizedError> {
        resolve_api_key(&self.credentials, provider, None)
    }
}
