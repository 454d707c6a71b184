//! Error Types

use thiserror::Error;

use crate::retry::Classify;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Transport-level provider failure (connection, decoding)
    #[error("Provider error: {0}")]
    Provider(String),

    /// The completion service answered with a non-success status
    #[error("Provider returned status {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    /// A tool with the same name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// Tool arguments failed validation against the tool's schema
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Final completion text does not match the configured response schema
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// A completion request or tool execution exceeded its budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An attachment could not be read
    #[error("Attachment error ({path}): {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discriminant of [`AgentError`], used to key retry allowances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Provider,
    ProviderStatus,
    DuplicateTool,
    ToolValidation,
    ToolExecution,
    StructuredOutput,
    Timeout,
    Attachment,
    Config,
    Io,
    Json,
}

impl AgentError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(_) => ErrorKind::Provider,
            Self::ProviderStatus { .. } => ErrorKind::ProviderStatus,
            Self::DuplicateTool(_) => ErrorKind::DuplicateTool,
            Self::ToolValidation(_) => ErrorKind::ToolValidation,
            Self::ToolExecution(_) => ErrorKind::ToolExecution,
            Self::StructuredOutput(_) => ErrorKind::StructuredOutput,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Attachment { .. } => ErrorKind::Attachment,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// HTTP-like status code, for provider status errors only
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::ProviderStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error is a transient server-side failure (5xx)
    pub fn is_transient(&self) -> bool {
        self.status_code().is_some_and(|s| (500..600).contains(&s))
    }
}

impl Classify for AgentError {
    type Kind = ErrorKind;

    fn kind(&self) -> ErrorKind {
        Self::kind(self)
    }

    fn status_code(&self) -> Option<u16> {
        Self::status_code(self)
    }
}
