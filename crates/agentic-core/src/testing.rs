//! Scripted provider for tests.
//!
//! Replays queued completions and errors in order and records every request
//! it receives, so tests can drive the client without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, CompletionRequest, ExtraResponseSettings, LlmProvider, TokenUsage};
use crate::tool::ToolCall;

/// Tool call with JSON arguments
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments.to_string())
}

/// What the provider saw for one completion request
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub settings: ExtraResponseSettings,
    pub response_format: Option<String>,
}

/// Provider that answers from a script
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Usage attached to every scripted completion
    pub const USAGE: TokenUsage = TokenUsage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    };

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_completion(self, mut completion: Completion) -> Self {
        completion.usage.get_or_insert(Self::USAGE);
        self.push(Ok(completion));
        self
    }

    #[must_use]
    pub fn with_text(self, text: &str) -> Self {
        self.with_completion(Completion::text("scripted", text))
    }

    #[must_use]
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.with_completion(Completion::with_tool_calls("scripted", calls))
    }

    #[must_use]
    pub fn with_error(self, error: AgentError) -> Self {
        self.push(Err(error));
        self
    }

    /// Wait this long before answering each request
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue another entry after construction
    pub fn push(&self, entry: Result<Completion>) {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(entry);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Entries not consumed yet
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_completion(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let recorded = RecordedRequest {
            model: request.model.to_owned(),
            messages: request.messages.to_vec(),
            tool_names: request
                .tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.name.clone())
                .collect(),
            settings: request.settings.clone(),
            response_format: request.response_format.map(|s| s.name().to_owned()),
        };
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(recorded);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
    }
}
