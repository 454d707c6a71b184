//! Provider Client
//!
//! Protocol logic shared by every backend: assembling the conversation,
//! embedding attachments, requesting completions, running the tool-calling
//! cycle (see `reasoning`), logging usage and validating the final answer.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attachment;
use crate::error::{AgentError, Result};
use crate::message::{ContentPart, Conversation, Message};
use crate::provider::{Completion, CompletionRequest, ExtraResponseSettings, LlmProvider};
use crate::response::{LlmResponse, ResponseSchema};
use crate::tool::{ToolSchema, Toolkit};

/// Default cap on tool-calling rounds per call
pub const DEFAULT_INTERACTIONS_LIMIT: usize = 10;

/// Operating rules appended after the user turn on every call
pub const OPERATING_INSTRUCTIONS: &str = "\
Use the provided tools.
- When a tool is relevant, call it immediately, without conversational filler or thinking out loud.
- Once the tool results contain everything needed to answer the request, give the final answer directly.
- If something is not sufficiently clear, ask for clarification.
- If you need a tool you do not have access to, stop and state which tool you need.
- If the request contains a logical error, point it out, then stop.";

/// Running token totals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One agent's connection to a completion backend
pub struct ProviderClient {
    provider: Arc<dyn LlmProvider>,
    agent_name: String,
    model: String,
    sys_instructions: Option<String>,
    response_schema: Option<ResponseSchema>,
    pub(crate) toolkit: Toolkit,
    settings: ExtraResponseSettings,
    pub(crate) interactions_limit: usize,
    pub(crate) tool_timeout: Option<Duration>,
    completion_timeout: Option<Duration>,
    pub(crate) rounds: AtomicUsize,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.name())
            .field("agent_name", &self.agent_name)
            .field("model", &self.model)
            .field("tools", &self.toolkit.names())
            .field("interactions_limit", &self.interactions_limit)
            .finish_non_exhaustive()
    }
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LlmProvider>, agent_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            agent_name: agent_name.into(),
            model: model.into(),
            sys_instructions: None,
            response_schema: None,
            toolkit: Toolkit::empty(),
            settings: ExtraResponseSettings::default(),
            interactions_limit: DEFAULT_INTERACTIONS_LIMIT,
            tool_timeout: None,
            completion_timeout: None,
            rounds: AtomicUsize::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_sys_instructions(mut self, instructions: Option<String>) -> Self {
        self.sys_instructions = instructions.filter(|i| !i.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_response_schema(mut self, schema: Option<ResponseSchema>) -> Self {
        self.response_schema = schema;
        self
    }

    #[must_use]
    pub fn with_toolkit(mut self, toolkit: Toolkit) -> Self {
        self.toolkit = toolkit;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExtraResponseSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub const fn with_interactions_limit(mut self, limit: usize) -> Self {
        self.interactions_limit = limit;
        self
    }

    /// Budget for a single tool execution
    #[must_use]
    pub const fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Budget for a single completion request
    #[must_use]
    pub const fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub const fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    /// Tool-calling rounds completed by the current call
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }

    pub fn usage(&self) -> UsageTotals {
        UsageTotals {
            prompt_tokens: self.prompt_tokens.load(Ordering::SeqCst),
            completion_tokens: self.completion_tokens.load(Ordering::SeqCst),
            total_tokens: self.total_tokens.load(Ordering::SeqCst),
        }
    }

    /// Zero the token totals and the round counter
    pub fn reset_counters(&self) {
        self.rounds.store(0, Ordering::SeqCst);
        self.prompt_tokens.store(0, Ordering::SeqCst);
        self.completion_tokens.store(0, Ordering::SeqCst);
        self.total_tokens.store(0, Ordering::SeqCst);
    }

    fn tool_schemas(&self) -> Option<&[ToolSchema]> {
        (!self.toolkit.is_empty()).then(|| self.toolkit.schematize())
    }

    /// Run one prompt: assemble the conversation, request a completion,
    /// resolve tool calls, then validate the final text.
    pub async fn get_model_response<P: AsRef<Path>>(&self, message: &str, attachments: &[P]) -> Result<LlmResponse> {
        self.rounds.store(0, Ordering::SeqCst);
        tracing::info!(
            model = %self.model,
            attachments = attachments.len(),
            "Starting prompt"
        );

        let mut conversation = Conversation::new();
        if let Some(instructions) = &self.sys_instructions {
            conversation.push(Message::system(instructions.as_str()));
        }
        if attachments.is_empty() {
            conversation.push(Message::user(message));
        } else {
            let mut parts = vec![ContentPart::text(message)];
            parts.extend(self.process_files(attachments).await?);
            conversation.push(Message::user_parts(parts));
        }
        conversation.push(Message::developer(OPERATING_INSTRUCTIONS));

        let mut completion = self
            .generate_completion(conversation.messages(), self.tool_schemas())
            .await?;

        if completion.has_tool_calls() {
            completion = self.complete_tool_calling_cycle(completion, &mut conversation).await?;
        }

        self.process_response(completion.text_or_empty())
    }

    /// One completion request with the configured model, settings and schema
    pub async fn generate_completion(&self, messages: &[Message], tools: Option<&[ToolSchema]>) -> Result<Completion> {
        tracing::debug!(settings = ?self.settings, messages = messages.len(), "Requesting completion");

        let mut request = CompletionRequest::new(&self.model, messages, &self.settings)
            .with_response_format(self.response_schema.as_ref());
        if let Some(tools) = tools {
            request = request.with_tools(tools);
        }

        let pending = self.provider.generate_completion(request);
        let completion = match self.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| AgentError::Timeout(format!("completion request exceeded {limit:?}")))??,
            None => pending.await?,
        };

        self.log_response(&completion);
        Ok(completion)
    }

    /// Read and encode attachments concurrently
    pub async fn process_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<ContentPart>> {
        attachment::process_files(paths).await
    }

    /// Log the completion and add its usage to the running totals
    pub fn log_response(&self, completion: &Completion) {
        tracing::debug!(completion = ?completion, "Full response");
        tracing::debug!(text = ?completion.content, "Text response");

        if let Some(usage) = completion.usage {
            self.prompt_tokens.fetch_add(u64::from(usage.prompt_tokens), Ordering::SeqCst);
            self.completion_tokens.fetch_add(u64::from(usage.completion_tokens), Ordering::SeqCst);
            self.total_tokens.fetch_add(u64::from(usage.total_tokens), Ordering::SeqCst);
        }

        match &completion.reasoning {
            Some(reasoning) => tracing::debug!(reasoning = %reasoning, "Reasoning response"),
            None => tracing::debug!("No reasoning provided in the message"),
        }
    }

    /// Usage, round count and elapsed time for the call
    pub fn summary_log(&self, elapsed: Duration) {
        let usage = self.usage();
        let rounds = self.rounds();

        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Cumulative token usage"
        );
        tracing::info!(rounds, "Tool-calling interactions");
        if rounds == 0 && !self.toolkit.is_empty() {
            tracing::warn!(
                tools = ?self.toolkit.names(),
                "Tools were provided but the model did not call any"
            );
        }
        tracing::info!("Prompt finished in {:.2} seconds", elapsed.as_secs_f64());
    }

    /// Validate the final text against the response schema, if any
    pub fn process_response(&self, text: &str) -> Result<LlmResponse> {
        let Some(schema) = &self.response_schema else {
            return Ok(LlmResponse::text(text));
        };

        let parsed = schema.validate(text).inspect_err(|e| {
            tracing::error!(schema = %schema.name(), error = %e, "Final response failed validation");
        })?;
        Ok(LlmResponse {
            final_response: text.to_owned(),
            parsed_response: Some(parsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::*;
    use crate::message::{Content, Role};
    use crate::testing::ScriptedProvider;
    use crate::tool::{ToolRegistry, ToolSpec};

    /// Add two numbers
    #[derive(Deserialize, JsonSchema)]
    struct PairArgs {
        x: f64,
        y: f64,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Answer {
        value: f64,
    }

    fn client(provider: &Arc<ScriptedProvider>) -> ProviderClient {
        ProviderClient::new(provider.clone(), "tester", "test-model")
    }

    #[tokio::test]
    async fn test_message_order() {
        let provider = Arc::new(ScriptedProvider::new().with_text("hi"));
        let client = client(&provider).with_sys_instructions(Some("Be brief.".into()));

        let response = client.get_model_response::<&str>("Hello", &[]).await.unwrap();
        assert_eq!(response.final_response, "hi");

        let request = &provider.requests()[0];
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Developer]);
        assert_eq!(request.messages[1].text(), "Hello");
        assert_eq!(request.messages[2].text(), OPERATING_INSTRUCTIONS);
        assert!(request.tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_attachments_follow_text_part() {
        let path = std::env::temp_dir().join(format!("agentic-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"ABC").unwrap();

        let provider = Arc::new(ScriptedProvider::new().with_text("a picture"));
        let response = client(&provider).get_model_response("Describe", &[&path]).await;
        std::fs::remove_file(&path).unwrap();
        response.unwrap();

        let request = &provider.requests()[0];
        let Content::Parts(parts) = &request.messages[0].content else {
            panic!("user turn should carry parts");
        };
        assert_eq!(parts[0], ContentPart::text("Describe"));
        assert!(matches!(parts[1], ContentPart::Image { .. }));
    }

    #[tokio::test]
    async fn test_tools_attached_to_request() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolSpec::blocking("addition", |a: PairArgs| Ok(a.x + a.y)))
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new().with_text("no tools needed"));
        let client = client(&provider).with_toolkit(Toolkit::from_registry(&registry, &["addition"], "tester"));

        client.get_model_response::<&str>("hi", &[]).await.unwrap();

        assert_eq!(provider.requests()[0].tool_names, vec!["addition".to_owned()]);
        assert_eq!(client.rounds(), 0);
    }

    #[tokio::test]
    async fn test_structured_output() {
        let provider = Arc::new(ScriptedProvider::new().with_text(r#"{"value": 28.0}"#));
        let client = client(&provider).with_response_schema(Some(ResponseSchema::of::<Answer>()));

        let response = client.get_model_response::<&str>("compute", &[]).await.unwrap();

        assert_eq!(response.parsed::<Answer>().unwrap(), Some(Answer { value: 28.0 }));
        assert_eq!(provider.requests()[0].response_format.as_deref(), Some("Answer"));
    }

    #[tokio::test]
    async fn test_structured_output_mismatch_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new().with_text("not json"));
        let client = client(&provider).with_response_schema(Some(ResponseSchema::of::<Answer>()));

        let err = client.get_model_response::<&str>("compute", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn test_usage_accumulates_until_reset() {
        let provider = Arc::new(ScriptedProvider::new().with_text("one").with_text("two"));
        let client = client(&provider);

        client.get_model_response::<&str>("a", &[]).await.unwrap();
        client.get_model_response::<&str>("b", &[]).await.unwrap();
        assert_eq!(client.usage().total_tokens, 2 * u64::from(ScriptedProvider::USAGE.total_tokens));

        client.reset_counters();
        assert_eq!(client.usage(), UsageTotals::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_timeout() {
        let provider = Arc::new(ScriptedProvider::new().with_text("late").with_delay(Duration::from_secs(30)));
        let client = client(&provider).with_completion_timeout(Some(Duration::from_secs(5)));

        let err = client.get_model_response::<&str>("hurry", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[test]
    fn test_plain_response_without_schema() {
        let provider = Arc::new(ScriptedProvider::new());
        let response = client(&provider).process_response("").unwrap();
        assert_eq!(response, LlmResponse::text(""));
    }
}
