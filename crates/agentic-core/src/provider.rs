//! LLM Provider Strategy Pattern
//!
//! Defines the contract every completion backend implements. The engine only
//! ever talks to a backend through [`LlmProvider`], so OpenRouter, Ollama or a
//! scripted test double are interchangeable.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentic_core::provider::{CompletionRequest, ExtraResponseSettings, LlmProvider};
//!
//! let settings = ExtraResponseSettings::default();
//! let completion = provider
//!     .generate_completion(CompletionRequest::new("google/gemini-2.5-pro", &messages, &settings))
//!     .await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::response::ResponseSchema;
use crate::tool::{ToolCall, ToolSchema};

/// Optional sampling settings merged into every completion request.
///
/// `None` fields are left out of the request entirely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraResponseSettings {
    /// Temperature for sampling (0.0 = deterministic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool choice hint (`auto`, `none`, `required`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl ExtraResponseSettings {
    /// Read `AGENT_TEMPERATURE`, `AGENT_MAX_TOKENS` and `AGENT_TOOL_CHOICE`.
    ///
    /// Unset variables stay `None`; malformed numbers are a configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let temperature = lookup("AGENT_TEMPERATURE")
            .map(|raw| {
                raw.trim()
                    .parse::<f32>()
                    .map_err(|e| AgentError::Config(format!("AGENT_TEMPERATURE '{raw}': {e}")))
            })
            .transpose()?;
        let max_tokens = lookup("AGENT_MAX_TOKENS")
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|e| AgentError::Config(format!("AGENT_MAX_TOKENS '{raw}': {e}")))
            })
            .transpose()?;
        let tool_choice = lookup("AGENT_TOOL_CHOICE")
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty());

        Ok(Self {
            temperature,
            max_tokens,
            tool_choice,
        })
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: impl Into<String>) -> Self {
        self.tool_choice = Some(tool_choice.into());
        self
    }
}

/// Everything a backend needs for one completion
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    /// Model identifier (e.g., "google/gemini-2.5-pro", "llama3.2")
    pub model: &'a str,

    /// Conversation so far, in order
    pub messages: &'a [Message],

    /// Tool schemas the model may call
    pub tools: Option<&'a [ToolSchema]>,

    /// Sampling settings
    pub settings: &'a ExtraResponseSettings,

    /// Structured output contract for the final answer
    pub response_format: Option<&'a ResponseSchema>,
}

impl<'a> CompletionRequest<'a> {
    pub const fn new(model: &'a str, messages: &'a [Message], settings: &'a ExtraResponseSettings) -> Self {
        Self {
            model,
            messages,
            tools: None,
            settings,
            response_format: None,
        }
    }

    /// Attach tool schemas. An empty list is treated as no tools.
    #[must_use]
    pub fn with_tools(mut self, tools: &'a [ToolSchema]) -> Self {
        self.tools = (!tools.is_empty()).then_some(tools);
        self
    }

    #[must_use]
    pub const fn with_response_format(mut self, schema: Option<&'a ResponseSchema>) -> Self {
        self.response_format = schema;
        self
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text, if any
    pub content: Option<String>,

    /// Pending tool invocations requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,

    /// Reasoning text some models return next to the answer
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Completion {
    /// Plain text completion
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            model: model.into(),
            finish_reason: Some(FinishReason::Stop),
            ..Self::default()
        }
    }

    /// Completion asking for tool invocations
    pub fn with_tool_calls(model: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            model: model.into(),
            finish_reason: Some(FinishReason::ToolUse),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Final text, empty when the model returned none
    pub fn text_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            _ => Self::Error,
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new completion backends.
/// The engine works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name, used in logs
    fn name(&self) -> &str;

    /// Accept a conversation plus tools and settings, return one completion
    async fn generate_completion(&self, request: CompletionRequest<'_>) -> Result<Completion>;
}
