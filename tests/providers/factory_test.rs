//! Provider factory behavior: adapter reuse, credential failures, and
//! the OpenRouter key-shape rule.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use quorum::credentials::Credentials;
use quorum::error::ErrorCategory;
use quorum::providers::{retry::RetryPolicy, ProviderFactory, ProviderSource};
use quorum::registry::{GenerationParams, ModelSpec};

fn creds(pairs: &[(&str, &str)]) -> Credentials {
    Credentials::from_map(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn spec(name: &str, provider: &str) -> ModelSpec {
    ModelSpec {
        name: name.to_owned(),
        provider: provider.to_owned(),
        input_token_limit: 8192,
        output_token_limit: 1024,
        default_parameters: GenerationParams::default(),
    }
}

fn factory(credentials: Credentials) -> ProviderFactory {
    ProviderFactory::new(
        credentials,
        Duration::from_secs(5),
        RetryPolicy::default(),
    )
    .expect("client builds")
}

#[test]
fn adapters_are_cached_per_model() {
    let factory = factory(creds(&[("OPENAI_API_KEY", "sk-test1234567890")]));
    let spec = spec("gpt-4o", "openai");

    let first = factory.provider_for(&spec).expect("first build");
    let second = factory.provider_for(&spec).expect("cache hit");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.provider_name(), "openai");
    assert_eq!(first.model_info().input_tokens, 8192);
}

#[test]
fn missing_credential_fails_with_invalid_request() {
    let factory = factory(creds(&[]));
    let err = factory
        .provider_for(&spec("gpt-4o", "openai"))
        .expect_err("no key available");
    assert_eq!(err.category, ErrorCategory::InvalidRequest);
    assert!(err.suggestion.contains("OPENAI_API_KEY"));
}

#[test]
fn openrouter_rejects_foreign_key_shapes() {
    let factory = factory(creds(&[("OPENROUTER_API_KEY", "sk-notrouter123456")]));
    let err = factory
        .provider_for(&spec("x-ai/grok-4", "openrouter"))
        .expect_err("wrong key shape");
    assert_eq!(err.category, ErrorCategory::Auth);
}

#[test]
fn openrouter_accepts_its_own_key_shape() {
    let factory = factory(creds(&[("OPENROUTER_API_KEY", "sk-or-v1-abcdef123456")]));
    let provider = factory
        .provider_for(&spec("x-ai/grok-4", "openrouter"))
        .expect("sk-or key accepted");
    assert_eq!(provider.provider_name(), "openrouter");
}

#[test]
fn unknown_provider_tag_is_not_found() {
    let factory = factory(creds(&[("MYSTERY_API_KEY", "value-1234")]));
    let err = factory
        .provider_for(&spec("mystery-1", "mystery"))
        .expect_err("no adapter exists");
    assert_eq!(err.category, ErrorCategory::NotFound);
}

#[test]
fn count_tokens_estimates_without_network() {
    let factory = factory(creds(&[("GEMINI_API_KEY", "AIzaTest1234")]));
    let provider = factory
        .provider_for(&spec("gemini-2.5-pro", "gemini"))
        .expect("adapter builds");

    let tokens = provider.count_tokens("abcdefgh").expect("local estimate");
    assert_eq!(tokens, 2);
    assert!(provider.count_tokens("  ").is_err());
}
