//! Agent Facade
//!
//! [`LlmAgent`] is the public entry point: it owns a [`ProviderClient`] bound
//! to one backend and runs every prompt through a [`RetryController`].
//!
//! ```rust,ignore
//! let agent = LlmAgent::builder("math")
//!     .backend(Backend::OpenRouter)
//!     .tools(&registry, &["addition", "multiplication"])
//!     .build()?;
//! let response = agent.prompt::<&str>("add 4 and 3, then multiply the result by 4", &[]).await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentic_core::{
    AgentError, AllowanceScope, ErrorKind, ExtraResponseSettings, LlmProvider, LlmResponse, ProviderClient,
    ResponseSchema, Result, RetryController, ToolRegistry, Toolkit, DEFAULT_INTERACTIONS_LIMIT, DEFAULT_RETRY_WAIT,
};
use tracing::Instrument;

use crate::config::{AgentConfig, Backend, EndpointConfig, DEFAULT_MODEL};
use crate::openai::OpenAiCompatProvider;

/// A configured agent
pub struct LlmAgent {
    client: ProviderClient,
    retry: RetryController<ErrorKind>,
    retry_wait: Duration,
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("client", &self.client)
            .field("retry_wait", &self.retry_wait)
            .finish_non_exhaustive()
    }
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>) -> LlmAgentBuilder {
        LlmAgentBuilder::new(name)
    }

    /// Send a prompt, with optional file attachments, and return the final answer
    pub async fn prompt<P: AsRef<Path>>(&self, message: &str, attachments: &[P]) -> Result<LlmResponse> {
        let started = Instant::now();
        self.client.reset_counters();

        let span = tracing::info_span!(
            "prompt",
            agent_name = %self.client.agent_name(),
            model_name = %self.client.model(),
            llm_backend = %self.client.provider_name(),
        );

        async {
            let result = self
                .retry
                .execute_with_retries(|| self.client.get_model_response(message, attachments), self.retry_wait)
                .await;
            self.client.summary_log(started.elapsed());

            let response = result?;
            tracing::debug!(text = %response.final_response, "Final text response");
            tracing::debug!(parsed = ?response.parsed_response, "Final parsed response");
            Ok(response)
        }
        .instrument(span)
        .await
    }

    pub fn name(&self) -> &str {
        self.client.agent_name()
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Protocol client, for counters and toolkit inspection
    pub const fn client(&self) -> &ProviderClient {
        &self.client
    }

    pub const fn retry_controller(&self) -> &RetryController<ErrorKind> {
        &self.retry
    }
}

/// Builder for [`LlmAgent`]
pub struct LlmAgentBuilder {
    name: String,
    backend: Option<Backend>,
    endpoint: Option<EndpointConfig>,
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    sys_instructions: Option<String>,
    response_schema: Option<ResponseSchema>,
    toolkit: Toolkit,
    settings: ExtraResponseSettings,
    interactions_limit: usize,
    retry_allowances: Vec<(ErrorKind, u32)>,
    retry_wait: Duration,
    allowance_scope: AllowanceScope,
    tool_timeout: Option<Duration>,
    completion_timeout: Option<Duration>,
}

impl LlmAgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: None,
            endpoint: None,
            provider: None,
            model: DEFAULT_MODEL.into(),
            sys_instructions: None,
            response_schema: None,
            toolkit: Toolkit::empty(),
            settings: ExtraResponseSettings::default(),
            interactions_limit: DEFAULT_INTERACTIONS_LIMIT,
            retry_allowances: vec![(ErrorKind::ProviderStatus, 3)],
            retry_wait: DEFAULT_RETRY_WAIT,
            allowance_scope: AllowanceScope::default(),
            tool_timeout: None,
            completion_timeout: None,
        }
    }

    /// Start from a declarative configuration
    pub fn from_config(config: &AgentConfig, registry: &ToolRegistry) -> Self {
        let mut builder = Self::new(config.name.clone())
            .backend(config.backend)
            .model(config.model.clone())
            .tools(registry, &config.tools)
            .settings(config.settings.clone())
            .interactions_limit(config.interactions_limit)
            .retry_allowances(config.retry_allowances.iter().map(|(k, v)| (*k, *v)))
            .allowance_scope(config.allowance_scope)
            .retry_wait(Duration::from_secs(config.retry_wait_secs))
            .tool_timeout(config.tool_timeout_secs.map(Duration::from_secs))
            .completion_timeout(config.completion_timeout_secs.map(Duration::from_secs));
        if let Some(instructions) = &config.sys_instructions {
            builder = builder.sys_instructions(instructions.clone());
        }
        builder
    }

    /// Completion backend, resolved from the environment at build time
    #[must_use]
    pub const fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Explicit endpoint instead of the environment lookup
    #[must_use]
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Use this provider instead of a backend
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn sys_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.sys_instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn response_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Give the agent these registry tools. Unknown names are skipped.
    #[must_use]
    pub fn tools<S: AsRef<str>>(mut self, registry: &ToolRegistry, names: &[S]) -> Self {
        self.toolkit = Toolkit::from_registry(registry, names, &self.name);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: ExtraResponseSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub const fn interactions_limit(mut self, limit: usize) -> Self {
        self.interactions_limit = limit;
        self
    }

    /// Add or replace the allowance for one error kind
    #[must_use]
    pub fn retry_allowance(mut self, kind: ErrorKind, allowance: u32) -> Self {
        self.retry_allowances.retain(|(k, _)| *k != kind);
        self.retry_allowances.push((kind, allowance));
        self
    }

    /// Replace all allowances
    #[must_use]
    pub fn retry_allowances(mut self, allowances: impl IntoIterator<Item = (ErrorKind, u32)>) -> Self {
        self.retry_allowances = allowances.into_iter().collect();
        self
    }

    #[must_use]
    pub const fn retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    #[must_use]
    pub const fn allowance_scope(mut self, scope: AllowanceScope) -> Self {
        self.allowance_scope = scope;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    fn resolve_provider(&mut self) -> Result<Arc<dyn LlmProvider>> {
        if let Some(provider) = self.provider.take() {
            return Ok(provider);
        }
        let backend = self
            .backend
            .ok_or_else(|| AgentError::Config("a backend or a provider is required".into()))?;
        let endpoint = match self.endpoint.take() {
            Some(endpoint) => endpoint,
            None => backend.endpoint_from_env()?,
        };
        tracing::debug!(backend = %backend, base_url = %endpoint.base_url, "Resolved LLM backend");
        Ok(Arc::new(OpenAiCompatProvider::from_config(backend.as_str(), &endpoint)?))
    }

    pub fn build(mut self) -> Result<LlmAgent> {
        let provider = self.resolve_provider()?;

        let client = ProviderClient::new(provider, self.name, self.model)
            .with_sys_instructions(self.sys_instructions)
            .with_response_schema(self.response_schema)
            .with_toolkit(self.toolkit)
            .with_settings(self.settings)
            .with_interactions_limit(self.interactions_limit)
            .with_tool_timeout(self.tool_timeout)
            .with_completion_timeout(self.completion_timeout);

        Ok(LlmAgent {
            client,
            retry: RetryController::new(self.retry_allowances).with_scope(self.allowance_scope),
            retry_wait: self.retry_wait,
        })
    }
}
