//! OpenAI-compatible adapter speaking the `/chat/completions` wire format.
//!
//! Serves two provider tags: `openai` against the OpenAI API, and
//! `openrouter` against the OpenRouter API, which uses the identical wire
//! format but enforces its own credential shape (`sk-or`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{
    check_http_response, estimate_tokens, require_prompt, retry, transport_error,
    ModelLimits, ModelProvider, ProviderResult,
};
use crate::error::{CategorizedError, ErrorCategory};
use crate::registry::GenerationParams;

/// OpenAI chat completions endpoint.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1/chat/completions";

/// OpenRouter chat completions endpoint (same wire format).
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Bytes per token assumed by the family's local estimator.
const BYTES_PER_TOKEN: u64 = 4;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages; always a single user message here.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum completion tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
}

/// A message in chat format.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (`user` for the single prompt message).
    pub role: String,
    /// Message text.
    pub content: Option<String>,
}

/// Chat completions response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Response choices; the first one carries the answer.
    pub choices: Vec<ChatChoice>,
    /// Token usage.
    pub usage: Option<ChatUsage>,
}

/// A single response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// Assistant message for this choice.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    /// Completion token count.
    pub completion_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a chat completions request from a prompt and merged parameters.
#[doc(hidden)]
pub fn build_request(model: &str, prompt: &str, params: &GenerationParams) -> ChatRequest {
    ChatRequest {
        model: model.to_owned(),
        messages: vec![ChatMessage {
            role: "user".to_owned(),
            content: Some(prompt.to_owned()),
        }],
        temperature: params.temperature,
        top_p: params.top_p,
        max_tokens: params.max_tokens,
        presence_penalty: params.presence_penalty,
        frequency_penalty: params.frequency_penalty,
    }
}

/// Parse a chat completions response body into a raw provider result.
///
/// # Errors
///
/// Returns [`ErrorCategory::Server`] when the body is not valid JSON or
/// has no first choice: a malformed success payload is a remote fault.
#[doc(hidden)]
pub fn parse_response(provider: &str, body: &str) -> Result<ProviderResult, CategorizedError> {
    let resp: ChatResponse = serde_json::from_str(body).map_err(|e| {
        CategorizedError::new(
            ErrorCategory::Server,
            format!("{provider} returned an unparseable response: {e}"),
        )
        .with_provider(provider)
    })?;

    let choice = resp.choices.into_iter().next().ok_or_else(|| {
        CategorizedError::new(
            ErrorCategory::Server,
            format!("{provider} response is missing choices[0]"),
        )
        .with_provider(provider)
    })?;

    let finish_reason = choice.finish_reason.unwrap_or_default();
    Ok(ProviderResult {
        content: choice.message.content.unwrap_or_default(),
        truncated: finish_reason == "length",
        finish_reason,
        token_count: resp
            .usage
            .and_then(|u| u.completion_tokens)
            .unwrap_or_default(),
        safety_info: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Adapter for OpenAI-compatible chat completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    provider_tag: &'static str,
    endpoint: &'static str,
    model: String,
    api_key: String,
    limits: ModelLimits,
    client: reqwest::Client,
    retry: retry::RetryPolicy,
}

impl OpenAiProvider {
    /// Create an adapter against the OpenAI API.
    pub fn openai(
        model: String,
        api_key: String,
        limits: ModelLimits,
        client: reqwest::Client,
        retry: retry::RetryPolicy,
    ) -> Self {
        Self {
            provider_tag: "openai",
            endpoint: OPENAI_API_BASE,
            model,
            api_key,
            limits,
            client,
            retry,
        }
    }

    /// Create an adapter against the OpenRouter API.
    ///
    /// # Errors
    ///
    /// OpenRouter issues only `sk-or` keys; any other shape is rejected
    /// with [`ErrorCategory::Auth`] before a request is made.
    pub fn openrouter(
        model: String,
        api_key: String,
        limits: ModelLimits,
        client: reqwest::Client,
        retry: retry::RetryPolicy,
    ) -> Result<Self, CategorizedError> {
        if !api_key.starts_with("sk-or") {
            return Err(CategorizedError::new(
                ErrorCategory::Auth,
                "OpenRouter API key does not start with 'sk-or'",
            )
            .with_provider("openrouter")
            .with_suggestion("create a key at openrouter.ai and set OPENROUTER_API_KEY"));
        }
        Ok(Self {
            provider_tag: "openrouter",
            endpoint: OPENROUTER_API_BASE,
            model,
            api_key,
            limits,
            client,
            retry,
        })
    }

    async fn generate_once(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ProviderResult, CategorizedError> {
        let request = build_request(&self.model, prompt, params);

        let response = self
            .client
            .post(self.endpoint)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(self.provider_tag, e))?;

        let body = check_http_response(self.provider_tag, response).await?;
        parse_response(self.provider_tag, &body)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Option<Instant>,
    ) -> Result<ProviderResult, CategorizedError> {
        require_prompt(self.provider_tag, prompt)?;
        params.validate()?;

        // Parameters are merged into the request inside each attempt;
        // the adapter instance stays read-only at call time.
        retry::with_retries(self.retry, self.provider_tag, deadline, || {
            self.generate_once(prompt, params)
        })
        .await
    }

    fn count_tokens(&self, prompt: &str) -> Result<u64, CategorizedError> {
        require_prompt(self.provider_tag, prompt)?;
        Ok(estimate_tokens(prompt, BYTES_PER_TOKEN))
    }

    fn model_info(&self) -> ModelLimits {
        self.limits
    }

    fn provider_name(&self) -> &str {
        self.provider_tag
    }
}
