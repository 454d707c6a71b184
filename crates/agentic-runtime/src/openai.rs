//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` for any `/chat/completions` endpoint that
//! speaks the OpenAI wire format (OpenRouter, Ollama's `/v1` API, ...).

use std::time::Duration;

use agentic_core::{
    error::{AgentError, Result},
    message::{Content, ContentPart, Message, Role},
    provider::{Completion, CompletionRequest, FinishReason, LlmProvider, TokenUsage},
    tool::{ToolCall, ToolSchema},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EndpointConfig;

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    /// Some providers return chain-of-thought next to the answer
    #[serde(default, skip_serializing)]
    reasoning: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a agentic_core::schemars::schema::RootSchema,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// OpenAI-compatible chat completion provider
#[derive(Clone, Debug)]
pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create from an endpoint configuration
    pub fn from_config(name: impl Into<String>, config: &EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            name: name.into(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert agent messages to the wire format
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str().to_owned(),
                content: Self::convert_content(m),
                name: (m.role == Role::Tool).then(|| m.name.clone()).flatten(),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: function_kind(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
                reasoning: None,
            })
            .collect()
    }

    fn convert_content(message: &Message) -> Option<Value> {
        match &message.content {
            // Assistant turns that only carry tool calls have no content
            Content::Text(text) if text.is_empty() && !message.tool_calls.is_empty() => None,
            Content::Text(text) => Some(Value::String(text.clone())),
            Content::Parts(parts) => Some(Value::Array(parts.iter().map(Self::convert_part).collect())),
        }
    }

    fn convert_part(part: &ContentPart) -> Value {
        let url = part.data_url();
        match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { .. } => json!({ "type": "image_url", "image_url": { "url": url } }),
            ContentPart::File { filename, .. } => json!({
                "type": "file",
                "file": { "filename": filename, "file_data": url }
            }),
        }
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<WireTool<'_>> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect()
    }

    fn build_request<'a>(request: &CompletionRequest<'a>) -> Result<ChatRequest<'a>> {
        let response_format = request
            .response_format
            .map(|schema| -> Result<Value> {
                Ok(json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema.name(),
                        "strict": true,
                        "schema": schema.json_schema()?,
                    }
                }))
            })
            .transpose()?;

        Ok(ChatRequest {
            model: request.model,
            messages: Self::convert_messages(request.messages),
            tools: request.tools.map(Self::convert_tools).unwrap_or_default(),
            temperature: request.settings.temperature,
            max_tokens: request.settings.max_tokens,
            tool_choice: request.settings.tool_choice.as_deref(),
            response_format,
        })
    }

    /// Convert a wire response to an agent completion
    fn convert_completion(response: ChatResponse, model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("response contained no choices".into()))?;

        let content = match choice.message.content {
            Some(Value::String(text)) => Some(text),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| {
                let id = if c.id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    c.id
                };
                ToolCall::new(id, c.function.name, c.function.arguments)
            })
            .collect();

        Ok(Completion {
            content,
            tool_calls,
            model: response.model.unwrap_or_else(|| model.to_owned()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens.saturating_add(u.completion_tokens)),
            }),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
            reasoning: choice.message.reasoning,
        })
    }

    /// Status error with the body's `error.message` when there is one
    fn status_error(status: u16, body: &str) -> AgentError {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.trim().to_owned());
        AgentError::ProviderStatus { status, message }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_completion(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let body = Self::build_request(&request)?;

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(provider = %self.name, status = status.as_u16(), "Completion request rejected");
            return Err(Self::status_error(status.as_u16(), &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::Provider(format!("malformed completion response: {e}")))?;
        Self::convert_completion(parsed, request.model)
    }
}

#[cfg(test)]
mod tests {
    use agentic_core::provider::ExtraResponseSettings;
    use agentic_core::response::ResponseSchema;
    use agentic_core::tool::{ToolRegistry, Toolkit};
    use schemars::JsonSchema;

    use super::*;

    /// Add two numbers
    #[derive(Deserialize, Serialize, JsonSchema)]
    struct PairArgs {
        x: f64,
        y: f64,
    }

    #[test]
    fn test_convert_messages() {
        let messages = vec![
            Message::system("sys"),
            Message::user_parts(vec![
                ContentPart::text("look"),
                ContentPart::Image { mime_type: "image/png".into(), data: "QUJD".into() },
                ContentPart::File {
                    filename: "a.pdf".into(),
                    mime_type: "application/pdf".into(),
                    data: "JVBE".into(),
                },
            ]),
            Message::assistant_with_tool_calls(None, vec![ToolCall::new("c1", "addition", r#"{"x":1,"y":2}"#)]),
            Message::tool("3.0", "c1", "addition"),
        ];

        let wire = serde_json::to_value(OpenAiCompatProvider::convert_messages(&messages)).unwrap();

        assert_eq!(wire[0], json!({ "role": "system", "content": "sys" }));
        assert_eq!(wire[1]["content"][0], json!({ "type": "text", "text": "look" }));
        assert_eq!(wire[1]["content"][1]["image_url"]["url"], "data:image/png;base64,QUJD");
        assert_eq!(wire[1]["content"][2]["file"]["file_data"], "data:application/pdf;base64,JVBE");
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "addition");
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[3], json!({ "role": "tool", "content": "3.0", "name": "addition", "tool_call_id": "c1" }));
    }

    #[test]
    fn test_build_request() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("addition", |a: PairArgs| Ok(a.x + a.y)).unwrap();
        let toolkit = Toolkit::from_registry(&registry, &["addition"], "tester");
        let settings = ExtraResponseSettings::default().with_temperature(0.0);
        let schema = ResponseSchema::of::<PairArgs>();
        let messages = vec![Message::user("hi")];

        let request = CompletionRequest::new("model-x", &messages, &settings)
            .with_tools(toolkit.schematize())
            .with_response_format(Some(&schema));
        let body = serde_json::to_value(OpenAiCompatProvider::build_request(&request).unwrap()).unwrap();

        assert_eq!(body["model"], "model-x");
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "addition");
        assert_eq!(body["tools"][0]["function"]["description"], "Add two numbers");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "PairArgs");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_convert_completion() {
        let raw = json!({
            "model": "served-model",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "reasoning": "need a tool",
                    "tool_calls": [
                        { "id": "call_1", "type": "function", "function": { "name": "addition", "arguments": "{\"x\":4,\"y\":3}" } },
                        { "function": { "name": "multiplication", "arguments": "{}" } }
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 8 }
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let completion = OpenAiCompatProvider::convert_completion(response, "requested").unwrap();

        assert!(completion.content.is_none());
        assert_eq!(completion.model, "served-model");
        assert_eq!(completion.tool_calls[0].id, "call_1");
        assert!(!completion.tool_calls[1].id.is_empty());
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(completion.usage.unwrap().total_tokens, 20);
        assert_eq!(completion.reasoning.as_deref(), Some("need a tool"));
    }

    #[test]
    fn test_oversized_usage_saturates() {
        let raw = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }],
            "usage": { "prompt_tokens": u32::MAX, "completion_tokens": 5 }
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let completion = OpenAiCompatProvider::convert_completion(response, "m").unwrap();

        assert_eq!(completion.usage.unwrap().total_tokens, u32::MAX);
    }

    #[test]
    fn test_empty_choices_is_provider_error() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        let err = OpenAiCompatProvider::convert_completion(response, "m").unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }

    #[test]
    fn test_status_error_message() {
        let err = OpenAiCompatProvider::status_error(503, r#"{"error":{"message":"overloaded","code":503}}"#);
        assert!(matches!(&err, AgentError::ProviderStatus { status: 503, message } if message == "overloaded"));
        assert!(err.is_transient());

        let err = OpenAiCompatProvider::status_error(404, "not found\n");
        assert!(matches!(err, AgentError::ProviderStatus { status: 404, message } if message == "not found"));
    }

    #[test]
    fn test_base_url_normalized() {
        let config = EndpointConfig {
            base_url: "http://localhost:11434/v1/".into(),
            api_key: Some("ollama".into()),
            timeout_secs: 5,
        };
        let provider = OpenAiCompatProvider::from_config("ollama", &config).unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
