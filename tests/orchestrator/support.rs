//! Shared test doubles for orchestrator integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use quorum::audit::{AuditRecord, AuditSink};
use quorum::config::RunConfig;
use quorum::credentials::{ApiKey, CredentialSource};
use quorum::error::{CategorizedError, ErrorCategory};
use quorum::limiter::RateLimiter;
use quorum::orchestrator::Orchestrator;
use quorum::output::OutputWriter;
use quorum::providers::{ModelLimits, ModelProvider, ProviderResult, ProviderSource};
use quorum::registry::{GenerationParams, ModelSpec, Registry};

/// What a mock provider does when asked to generate.
#[derive(Debug)]
pub enum MockBehavior {
    /// Reply with the given text and finish reason `stop`.
    Reply(&'static str),
    /// Return this exact raw result.
    Raw(ProviderResult),
    /// Fail with a categorized error of this category.
    Fail(ErrorCategory),
    /// Never complete; used for deadline and cancellation tests.
    Hang,
}

/// Scriptable in-memory provider.
#[derive(Debug)]
pub struct MockProvider {
    behavior: MockBehavior,
    /// Prompts received, in call order.
    pub prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        _deadline: Option<Instant>,
    ) -> Result<ProviderResult, CategorizedError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_owned());
        match &self.behavior {
            MockBehavior::Reply(text) => Ok(ProviderResult {
                content: (*text).to_owned(),
                finish_reason: "stop".to_owned(),
                token_count: 3,
                truncated: false,
                safety_info: Vec::new(),
            }),
            MockBehavior::Raw(result) => Ok(result.clone()),
            MockBehavior::Fail(category) => {
                Err(CategorizedError::new(*category, "mock failure").with_provider("mock"))
            }
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    fn count_tokens(&self, prompt: &str) -> Result<u64, CategorizedError> {
        Ok(u64::try_from(prompt.len()).unwrap_or(u64::MAX).div_ceil(4))
    }

    fn model_info(&self) -> ModelLimits {
        ModelLimits {
            input_tokens: 4096,
            output_tokens: 2048,
        }
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

/// Provider source serving scripted mocks keyed by model name.
#[derive(Default)]
pub struct MockSource {
    providers: HashMap<String, Arc<MockProvider>>,
    fail_credentials: bool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str, provider: Arc<MockProvider>) -> Self {
        self.providers.insert(name.to_owned(), provider);
        self
    }

    pub fn failing_credentials(mut self) -> Self {
        self.fail_credentials = true;
        self
    }
}

impl ProviderSource for MockSource {
    fn provider_for(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelProvider>, CategorizedError> {
        self.providers
            .get(&spec.name)
            .cloned()
            .map(|p| p as Arc<dyn ModelProvider>)
            .ok_or_else(|| {
                CategorizedError::new(
                    ErrorCategory::NotFound,
                    format!("no mock provider for {}", spec.name),
                )
            })
    }

    fn preflight_credential(&self, provider: &str) -> Result<ApiKey, CategorizedError> {
        if self.fail_credentials {
            return Err(CategorizedError::new(
                ErrorCategory::InvalidRequest,
                format!("no API key found for provider '{provider}'"),
            ));
        }
        Ok(ApiKey {
            provider: provider.to_owned(),
            value: "mock-key".to_owned(),
            source: CredentialSource::Parameter,
            environment_variable: None,
        })
    }
}

/// Audit sink that captures every record for assertions.
#[derive(Default)]
pub struct CaptureAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl CaptureAudit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Operations in record order.
    pub fn operations(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .map(|r| r.operation.clone())
            .collect()
    }
}

impl AuditSink for CaptureAudit {
    fn record(&self, record: AuditRecord) {
        self.records.lock().expect("records lock").push(record);
    }
}

/// Registry with mock-provider models `m1`, `m2`, `m3`, and `s`.
pub fn test_registry() -> Registry {
    let spec = |name: &str| ModelSpec {
        name: name.to_owned(),
        provider: "mock".to_owned(),
        input_token_limit: 4096,
        output_token_limit: 2048,
        default_parameters: GenerationParams::default(),
    };
    Registry::new(vec![spec("m1"), spec("m2"), spec("m3"), spec("s")])
}

/// Run configuration writing into `output_dir` with no audit file.
pub fn test_config(models: &[&str], output_dir: &std::path::Path) -> RunConfig {
    RunConfig {
        models: models.iter().map(|m| (*m).to_owned()).collect(),
        instructions: "Summarize the input.".to_owned(),
        output_dir: output_dir.to_path_buf(),
        timeout: std::time::Duration::from_secs(60),
        max_concurrent: 0,
        rate_limit_rpm: 0,
        ..RunConfig::default()
    }
}

/// Wire an orchestrator from a config, a mock source, and a capture sink.
pub fn orchestrator(
    config: RunConfig,
    source: MockSource,
    audit: Arc<CaptureAudit>,
) -> Orchestrator {
    let writer = OutputWriter::new(
        config.output_dir.clone(),
        config.dir_permissions,
        config.file_permissions,
        config.extension.clone(),
    );
    let limiter = RateLimiter::new(config.max_concurrent, config.rate_limit_rpm);
    Orchestrator::new(
        config,
        Arc::new(test_registry()),
        Arc::new(source),
        Arc::new(limiter),
        Arc::new(writer),
        audit,
    )
}
