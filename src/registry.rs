//! Model registry: name → provider, token limits, default parameters.
//!
//! The registry is an explicit value constructed at startup and passed into
//! the orchestrator, the provider factory, and the validator. Lookup goes
//! through the [`RegistryLookup`] trait so tests can substitute a stub.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CategorizedError, ErrorCategory};

/// Conservative input token limit for unrecognized models.
pub const FALLBACK_INPUT_TOKENS: u32 = 4096;
/// Conservative output token limit for unrecognized models.
pub const FALLBACK_OUTPUT_TOKENS: u32 = 2048;

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Sampling and length parameters sent with a generation request.
///
/// Unset fields fall back to whatever the remote defaults to. Merging
/// overrides onto model defaults is field-wise: a set override wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature, valid range `[0, 2]`.
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff, valid range `[0, 1]`.
    pub top_p: Option<f64>,
    /// Maximum tokens to generate, must be positive when set.
    pub max_tokens: Option<u32>,
    /// Presence penalty, valid range `[-2, 2]`.
    pub presence_penalty: Option<f64>,
    /// Frequency penalty, valid range `[-2, 2]`.
    pub frequency_penalty: Option<f64>,
}

impl GenerationParams {
    /// Field-wise merge: values set on `overrides` win over `self`.
    pub fn merged(self, overrides: Self) -> Self {
        Self {
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
        }
    }

    /// Validate every set field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCategory::InvalidRequest`] naming the offending
    /// parameter.
    pub fn validate(&self) -> Result<(), CategorizedError> {
        let out_of_range = |name: &str, value: f64| {
            CategorizedError::new(
                ErrorCategory::InvalidRequest,
                format!("parameter {name} out of range: {value}"),
            )
        };

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(out_of_range("temperature", t));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(out_of_range("top_p", p));
            }
        }
        if let Some(m) = self.max_tokens {
            if m == 0 {
                return Err(CategorizedError::new(
                    ErrorCategory::InvalidRequest,
                    "parameter max_tokens must be positive",
                ));
            }
        }
        if let Some(p) = self.presence_penalty {
            if !(-2.0..=2.0).contains(&p) {
                return Err(out_of_range("presence_penalty", p));
            }
        }
        if let Some(p) = self.frequency_penalty {
            if !(-2.0..=2.0).contains(&p) {
                return Err(out_of_range("frequency_penalty", p));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model specs
// ---------------------------------------------------------------------------

/// Immutable description of one supported model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Unique model identifier as the operator writes it.
    pub name: String,
    /// Provider tag owning this model.
    pub provider: String,
    /// Maximum prompt tokens the model accepts.
    pub input_token_limit: u32,
    /// Maximum tokens the model will generate.
    pub output_token_limit: u32,
    /// Parameters applied when the run supplies no override.
    pub default_parameters: GenerationParams,
}

/// Lookup capability handed to the validator and the provider factory.
///
/// The production implementation is [`Registry`]; tests use stubs.
pub trait RegistryLookup: Send + Sync {
    /// Resolve a model name to its spec, if supported.
    fn lookup(&self, name: &str) -> Option<ModelSpec>;

    /// Names of all enumerated models, in registration order.
    fn supported_names(&self) -> Vec<String>;
}

/// The built-in model table.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: Vec<ModelSpec>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Construct the registry from an explicit spec list.
    pub fn new(specs: Vec<ModelSpec>) -> Self {
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
        Self { specs, index }
    }

    /// The models this build knows about.
    pub fn builtin() -> Self {
        let spec = |name: &str, provider: &str, input: u32, output: u32| ModelSpec {
            name: name.to_owned(),
            provider: provider.to_owned(),
            input_token_limit: input,
            output_token_limit: output,
            default_parameters: GenerationParams {
                temperature: Some(0.7),
                ..GenerationParams::default()
            },
        };

        Self::new(vec![
            spec("gpt-4.1", "openai", 1_047_576, 32_768),
            spec("gpt-4.1-mini", "openai", 1_047_576, 32_768),
            spec("gpt-4o", "openai", 128_000, 16_384),
            spec("o4-mini", "openai", 200_000, 100_000),
            spec("gemini-2.5-pro", "gemini", 1_048_576, 65_536),
            spec("gemini-2.5-flash", "gemini", 1_048_576, 65_536),
            spec("deepseek/deepseek-chat-v3", "openrouter", 163_840, 16_384),
            spec(
                "meta-llama/llama-3.3-70b-instruct",
                "openrouter",
                131_072,
                8_192,
            ),
            spec("x-ai/grok-4", "openrouter", 256_000, 32_768),
        ])
    }

    /// Resolve a name, routing unenumerated OpenRouter slugs by shape.
    ///
    /// Any name containing `/` is an OpenRouter slug; slugs not in the
    /// table get conservative fallback limits so new router models work
    /// without a rebuild. Names without `/` must be enumerated.
    pub fn resolve(&self, name: &str) -> Result<ModelSpec, CategorizedError> {
        if let Some(spec) = RegistryLookup::lookup(self, name) {
            return Ok(spec);
        }
        if name.contains('/') {
            return Ok(ModelSpec {
                name: name.to_owned(),
                provider: "openrouter".to_owned(),
                input_token_limit: FALLBACK_INPUT_TOKENS,
                output_token_limit: FALLBACK_OUTPUT_TOKENS,
                default_parameters: GenerationParams::default(),
            });
        }
        Err(CategorizedError::new(
            ErrorCategory::NotFound,
            format!("unsupported model: {name}"),
        )
        .with_suggestion(format!(
            "supported models: {}",
            self.supported_names().join(", ")
        )))
    }
}

impl RegistryLookup for Registry {
    fn lookup(&self, name: &str) -> Option<ModelSpec> {
        self.index.get(name).map(|&i| self.specs[i].clone())
    }

    fn supported_names(&self) -> Vec<String> {
        self.specs.iter().map(|spec| spec.name.clone()).collect()
    }
}
