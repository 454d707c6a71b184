//! # agentic-core
//!
//! Agent execution engine: explicit tool registry, provider-agnostic
//! completion contract, tool-calling cycle and error-kind-scoped retries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ProviderClient                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ Tool-Calling │  │   Toolkit    │  │      LlmProvider       │  │
//! │  │    Cycle     │──│ (from the    │──│      (Strategy)        │  │
//! │  │              │  │  registry)   │  │                        │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!                 ▲
//!                 │ execute_with_retries
//!          RetryController
//! ```
//!
//! Backends implement [`LlmProvider`]; everything protocol-related (message
//! assembly, attachments, tool execution, structured output) lives in
//! [`ProviderClient`] so it is shared by all of them.

pub mod attachment;
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod response;
pub mod retry;
pub mod tool;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ProviderClient, UsageTotals, DEFAULT_INTERACTIONS_LIMIT};
pub use error::{AgentError, ErrorKind, Result};
pub use message::{Content, ContentPart, Conversation, Message, Role};
pub use provider::{Completion, CompletionRequest, ExtraResponseSettings, LlmProvider, TokenUsage};
pub use response::{LlmResponse, ResponseSchema};
pub use retry::{AllowanceScope, Classify, ErrorAllowance, RetryController, DEFAULT_RETRY_WAIT};
pub use tool::{
    DuplicatePolicy, ToolCall, ToolHandle, ToolRegistry, ToolSchema, ToolSpec, Toolkit, ToolkitDefinition,
};

// Re-exported so tool argument types can derive `JsonSchema` without a direct dependency
pub use schemars;
