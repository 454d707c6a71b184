//! Backend selection and agent configuration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use agentic_core::error::{AgentError, ErrorKind, Result};
use agentic_core::provider::ExtraResponseSettings;
use agentic_core::retry::AllowanceScope;
use serde::{Deserialize, Serialize};

/// OpenRouter API base address
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Ollama's OpenAI-compatible API on the local machine
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Ollama ignores the key but OpenAI-style clients must send one
pub const OLLAMA_API_KEY: &str = "ollama";

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-pro";

/// HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Supported completion backends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    OpenRouter,
    Ollama,
}

impl Backend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }

    /// Resolve base address and credential from the environment (and `.env`)
    pub fn endpoint_from_env(self) -> Result<EndpointConfig> {
        dotenvy::dotenv().ok();
        self.endpoint_from_lookup(|key| std::env::var(key).ok())
    }

    fn endpoint_from_lookup(self, lookup: impl Fn(&str) -> Option<String>) -> Result<EndpointConfig> {
        match self {
            Self::OpenRouter => {
                let api_key = lookup("OPEN_ROUTER_API_KEY")
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| AgentError::Config("OPEN_ROUTER_API_KEY not set".into()))?;
                Ok(EndpointConfig {
                    base_url: OPENROUTER_BASE_URL.into(),
                    api_key: Some(api_key),
                    timeout_secs: DEFAULT_TIMEOUT_SECS,
                })
            }
            Self::Ollama => Ok(EndpointConfig {
                base_url: lookup("OLLAMA_BASE_URL")
                    .filter(|u| !u.trim().is_empty())
                    .unwrap_or_else(|| OLLAMA_BASE_URL.into()),
                api_key: Some(OLLAMA_API_KEY.into()),
                timeout_secs: DEFAULT_TIMEOUT_SECS,
            }),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::Config(format!(
                "unknown LLM backend '{other}', expected one of: openrouter, ollama"
            ))),
        }
    }
}

/// Where and how to reach a completion endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base address, without the `/chat/completions` suffix
    pub base_url: String,

    /// Bearer credential, if the endpoint needs one
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Declarative agent settings, for callers that load configuration from files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name used in logs
    pub name: String,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub sys_instructions: Option<String>,

    /// Registry names of the tools this agent may call
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub settings: ExtraResponseSettings,

    /// Cap on tool-calling rounds per call
    #[serde(default = "default_interactions_limit")]
    pub interactions_limit: usize,

    /// Retries allowed per error kind
    #[serde(default = "default_retry_allowances")]
    pub retry_allowances: HashMap<ErrorKind, u32>,

    /// Whether retry counts persist across calls or reset on each one
    #[serde(default)]
    pub allowance_scope: AllowanceScope,

    /// Seconds to wait between retries
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,

    /// Budget for one tool execution, in seconds
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,

    /// Budget for one completion request, in seconds
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

const fn default_interactions_limit() -> usize {
    agentic_core::DEFAULT_INTERACTIONS_LIMIT
}

fn default_retry_allowances() -> HashMap<ErrorKind, u32> {
    HashMap::from([(ErrorKind::ProviderStatus, 3)])
}

const fn default_retry_wait_secs() -> u64 {
    agentic_core::DEFAULT_RETRY_WAIT.as_secs()
}

impl AgentConfig {
    /// Defaults for everything but the name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: Backend::default(),
            model: default_model(),
            sys_instructions: None,
            tools: Vec::new(),
            settings: ExtraResponseSettings::default(),
            interactions_limit: default_interactions_limit(),
            retry_allowances: default_retry_allowances(),
            allowance_scope: AllowanceScope::default(),
            retry_wait_secs: default_retry_wait_secs(),
            tool_timeout_secs: None,
            completion_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(" OpenRouter ".parse::<Backend>().unwrap(), Backend::OpenRouter);
        assert_eq!("ollama".parse::<Backend>().unwrap(), Backend::Ollama);
        assert!(matches!("gpt".parse::<Backend>(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_openrouter_requires_key() {
        let err = Backend::OpenRouter.endpoint_from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, AgentError::Config(msg) if msg.contains("OPEN_ROUTER_API_KEY")));

        let endpoint = Backend::OpenRouter
            .endpoint_from_lookup(|k| (k == "OPEN_ROUTER_API_KEY").then(|| "sk-test".to_owned()))
            .unwrap();
        assert_eq!(endpoint.base_url, OPENROUTER_BASE_URL);
        assert_eq!(endpoint.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_ollama_defaults_and_override() {
        let endpoint = Backend::Ollama.endpoint_from_lookup(|_| None).unwrap();
        assert_eq!(endpoint.base_url, OLLAMA_BASE_URL);
        assert_eq!(endpoint.api_key.as_deref(), Some(OLLAMA_API_KEY));
        assert_eq!(endpoint.timeout_secs, DEFAULT_TIMEOUT_SECS);

        let endpoint = Backend::Ollama
            .endpoint_from_lookup(|k| (k == "OLLAMA_BASE_URL").then(|| "http://gpu-box:11434/v1".to_owned()))
            .unwrap();
        assert_eq!(endpoint.base_url, "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_agent_config_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{ "name": "math", "tools": ["addition"] }"#).unwrap();

        assert_eq!(config, AgentConfig {
            tools: vec!["addition".into()],
            ..AgentConfig::named("math")
        });
        assert_eq!(config.retry_allowances.get(&ErrorKind::ProviderStatus), Some(&3));
        assert_eq!(config.retry_wait_secs, 3);
        assert_eq!(config.allowance_scope, AllowanceScope::ControllerLifetime);
    }

    #[test]
    fn test_agent_config_full() {
        let config: AgentConfig = serde_json::from_str(
            r#"{
                "name": "local",
                "backend": "ollama",
                "model": "llama3.2",
                "settings": { "temperature": 0.1 },
                "interactions_limit": 4,
                "retry_allowances": { "provider_status": 1, "timeout": 2 },
                "allowance_scope": "per_call",
                "tool_timeout_secs": 30
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, Backend::Ollama);
        assert_eq!(config.settings.temperature, Some(0.1));
        assert_eq!(config.retry_allowances.get(&ErrorKind::Timeout), Some(&2));
        assert_eq!(config.allowance_scope, AllowanceScope::PerCall);
        assert_eq!(config.tool_timeout_secs, Some(30));
    }
}
