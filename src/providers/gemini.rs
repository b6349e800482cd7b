//! Google Gemini adapter speaking the `generateContent` API.
//!
//! Gemini reports safety ratings per candidate and a prompt-level block
//! reason; both are mapped into the uniform safety-info list so the result
//! processor can treat blocked content identically across providers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::{
    check_http_response, estimate_tokens, require_prompt, retry, transport_error,
    ModelLimits, ModelProvider, ProviderResult, SafetyInfo,
};
use crate::error::{CategorizedError, ErrorCategory};
use crate::registry::GenerationParams;

/// Generative Language API base.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Bytes per token assumed by the family's local estimator.
const BYTES_PER_TOKEN: u64 = 4;

/// Adapter for the Gemini `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    model: String,
    api_key: String,
    limits: ModelLimits,
    client: reqwest::Client,
    retry: retry::RetryPolicy,
}

impl GeminiProvider {
    /// Create a Gemini adapter for one model.
    pub fn new(
        model: String,
        api_key: String,
        limits: ModelLimits,
        client: reqwest::Client,
        retry: retry::RetryPolicy,
    ) -> Self {
        Self {
            model,
            api_key,
            limits,
            client,
            retry,
        }
    }

    fn endpoint(&self) -> String {
        format!("{GEMINI_API_BASE}/{}:generateContent", self.model)
    }

    async fn generate_once(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ProviderResult, CategorizedError> {
        let request = build_request(prompt, params);

        let response = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        let body = check_http_response("gemini", response).await?;
        parse_response(&body)
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a `generateContent` request body.
#[doc(hidden)]
pub fn build_request(prompt: &str, params: &GenerationParams) -> Value {
    let mut generation_config = serde_json::Map::new();
    if let Some(t) = params.temperature {
        generation_config.insert("temperature".to_owned(), Value::from(t));
    }
    if let Some(p) = params.top_p {
        generation_config.insert("topP".to_owned(), Value::from(p));
    }
    if let Some(m) = params.max_tokens {
        generation_config.insert("maxOutputTokens".to_owned(), Value::from(m));
    }

    let mut body = serde_json::json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": prompt}],
        }],
    });
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    body
}

/// Parse a `generateContent` response body into a raw provider result.
///
/// A prompt-level block reason or a blocked safety rating yields a result
/// whose safety info carries `blocked = true`; the result processor turns
/// that into a content-filtered failure.
///
/// # Errors
///
/// Returns [`ErrorCategory::Server`] for unparseable JSON: a malformed
/// success payload is a remote fault.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<ProviderResult, CategorizedError> {
    let parsed: Value = serde_json::from_str(body).map_err(|e| {
        CategorizedError::new(
            ErrorCategory::Server,
            format!("gemini returned an unparseable response: {e}"),
        )
        .with_provider("gemini")
    })?;

    let mut safety_info = Vec::new();

    // Prompt-level feedback blocks the whole request.
    if let Some(reason) = parsed
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        safety_info.push(SafetyInfo {
            category: reason.to_owned(),
            blocked: true,
        });
    }

    let candidate = parsed.pointer("/candidates/0");

    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    if let Some(ratings) = candidate
        .and_then(|c| c.get("safetyRatings"))
        .and_then(Value::as_array)
    {
        let candidate_blocked = finish_reason == "SAFETY";
        for rating in ratings {
            let category = rating
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("UNSPECIFIED")
                .to_owned();
            let blocked = rating
                .get("blocked")
                .and_then(Value::as_bool)
                .unwrap_or(candidate_blocked);
            safety_info.push(SafetyInfo { category, blocked });
        }
    } else if finish_reason == "SAFETY" {
        safety_info.push(SafetyInfo {
            category: "SAFETY".to_owned(),
            blocked: true,
        });
    }

    let mut content = String::new();
    if let Some(parts) = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                content.push_str(text);
            }
        }
    }

    let token_count = parsed
        .pointer("/usageMetadata/candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or_default();

    Ok(ProviderResult {
        content,
        truncated: finish_reason == "MAX_TOKENS" || finish_reason == "length",
        finish_reason,
        token_count,
        safety_info,
    })
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Option<Instant>,
    ) -> Result<ProviderResult, CategorizedError> {
        require_prompt("gemini", prompt)?;
        params.validate()?;

        retry::with_retries(self.retry, "gemini", deadline, || {
            self.generate_once(prompt, params)
        })
        .await
    }

    fn count_tokens(&self, prompt: &str) -> Result<u64, CategorizedError> {
        require_prompt("gemini", prompt)?;
        Ok(estimate_tokens(prompt, BYTES_PER_TOKEN))
    }

    fn model_info(&self) -> ModelLimits {
        self.limits
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}
