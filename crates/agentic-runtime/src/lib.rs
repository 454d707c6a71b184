//! # agentic-runtime
//!
//! Concrete backends and the agent facade.
//!
//! ## Backends
//!
//! - **OpenRouter** (default): hosted models, key from `OPEN_ROUTER_API_KEY`
//! - **Ollama**: local inference through its OpenAI-compatible `/v1` API
//!
//! Both speak the same wire format and are served by [`OpenAiCompatProvider`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentic_runtime::{Backend, LlmAgent};
//!
//! let agent = LlmAgent::builder("assistant")
//!     .backend("ollama".parse::<Backend>()?)
//!     .model("llama3.2")
//!     .build()?;
//! let response = agent.prompt::<&str>("Hello", &[]).await?;
//! ```

pub mod agent;
pub mod config;
pub mod openai;

pub use agent::{LlmAgent, LlmAgentBuilder};
pub use config::{AgentConfig, Backend, EndpointConfig};
pub use openai::OpenAiCompatProvider;

// Re-export core types for convenience
pub use agentic_core::{
    AgentError, ErrorKind, ExtraResponseSettings, LlmProvider, LlmResponse, ResponseSchema, Result, ToolRegistry,
    ToolSpec, ToolkitDefinition,
};
