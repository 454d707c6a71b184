//! Tool System
//!
//! Tools are plain Rust functions (blocking or async) registered under a name
//! together with the JSON schema of their argument type. An agent only sees the
//! [`Toolkit`] it was built with: a filtered view of a [`ToolRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt};
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Used when neither an explicit description nor a doc comment is available
pub const MISSING_DESCRIPTION: &str = "No description provided.";

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, echoed back in the tool result message
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as raw JSON text, exactly as produced by the model
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument JSON. Blank arguments mean "no arguments".
    pub fn parse_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments).map_err(|e| {
            AgentError::ToolValidation(format!(
                "arguments for '{}' are not valid JSON: {e}",
                self.name
            ))
        })
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON schema of the argument object
    pub parameters: RootSchema,
}

type BlockingFn = dyn Fn(Value) -> Result<Value> + Send + Sync;
type AsyncFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

#[derive(Clone)]
enum Callable {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
}

/// A tool as registered: callable, argument schema and execution model
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: Option<String>,
    parameters: RootSchema,
    callable: Callable,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("is_coroutine", &self.is_coroutine())
            .finish_non_exhaustive()
    }
}

fn validate_args<A: DeserializeOwned>(name: &str, args: Value) -> Result<A> {
    serde_json::from_value(args)
        .map_err(|e| AgentError::ToolValidation(format!("invalid arguments for '{name}': {e}")))
}

fn encode_output<R: Serialize>(name: &str, output: &R) -> Result<Value> {
    serde_json::to_value(output)
        .map_err(|e| AgentError::ToolExecution(format!("'{name}' returned an unserializable value: {e}")))
}

fn execution_failure(name: &str, err: &anyhow::Error) -> AgentError {
    AgentError::ToolExecution(format!("'{name}' failed: {err:#}"))
}

impl ToolSpec {
    /// Wrap a blocking function. It runs on the blocking thread pool.
    pub fn blocking<A, R, F>(name: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let callable: Arc<BlockingFn> = Arc::new(move |args: Value| {
            let parsed = validate_args::<A>(&tool_name, args)?;
            let output = func(parsed).map_err(|e| execution_failure(&tool_name, &e))?;
            encode_output(&tool_name, &output)
        });

        Self {
            name,
            description: None,
            parameters: schemars::schema_for!(A),
            callable: Callable::Blocking(callable),
        }
    }

    /// Wrap an async function. It runs concurrently on the calling task.
    pub fn asynchronous<A, R, F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let callable: Arc<AsyncFn> = Arc::new(move |args: Value| {
            let parsed = match validate_args::<A>(&tool_name, args) {
                Ok(parsed) => parsed,
                Err(e) => return futures::future::ready(Err(e)).boxed(),
            };
            let pending = func(parsed);
            let tool_name = tool_name.clone();
            async move {
                let output = pending.await.map_err(|e| execution_failure(&tool_name, &e))?;
                encode_output(&tool_name, &output)
            }
            .boxed()
        });

        Self {
            name,
            description: None,
            parameters: schemars::schema_for!(A),
            callable: Callable::Async(callable),
        }
    }

    /// Override the description taken from the argument type's doc comment
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_coroutine(&self) -> bool {
        matches!(self.callable, Callable::Async(_))
    }

    /// Explicit description, else the doc comment of the argument type
    fn resolved_description(&self) -> String {
        self.description
            .clone()
            .or_else(|| {
                self.parameters
                    .schema
                    .metadata
                    .as_ref()
                    .and_then(|m| m.description.clone())
            })
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| MISSING_DESCRIPTION.to_owned())
    }
}

/// What to do when a name is registered twice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Keep the first registration and return [`AgentError::DuplicateTool`]
    #[default]
    Reject,
    /// Replace the earlier registration
    Overwrite,
}

/// Handle returned by registration
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolHandle {
    name: String,
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry for available tools
///
/// Built once at startup and handed to every agent that needs it; toolkits
/// keep their own handles, so later changes never leak into a live agent.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolSpec>>,
    policy: DuplicatePolicy,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            tools: HashMap::new(),
            policy,
        }
    }

    /// Register a tool under its own name
    pub fn register(&mut self, spec: ToolSpec) -> Result<ToolHandle> {
        let name = spec.name.clone();
        if self.tools.contains_key(&name) {
            match self.policy {
                DuplicatePolicy::Reject => return Err(AgentError::DuplicateTool(name)),
                DuplicatePolicy::Overwrite => {
                    tracing::warn!(tool = %name, "Overwriting previously registered tool");
                }
            }
        }

        tracing::debug!(tool = %name, is_coroutine = spec.is_coroutine(), "Registered tool");
        self.tools.insert(name.clone(), Arc::new(spec));
        Ok(ToolHandle { name })
    }

    /// Register a blocking function
    pub fn register_fn<A, R, F>(&mut self, name: impl Into<String>, func: F) -> Result<ToolHandle>
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.register(ToolSpec::blocking(name, func))
    }

    /// Register an async function
    pub fn register_async<A, R, F, Fut>(&mut self, name: impl Into<String>, func: F) -> Result<ToolHandle>
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register(ToolSpec::asynchronous(name, func))
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Zero-argument unit of tool work, arguments already bound
pub enum Executable {
    Blocking(Box<dyn FnOnce() -> Result<Value> + Send>),
    Async(BoxFuture<'static, Result<Value>>),
}

impl Executable {
    /// Start the work. Blocking jobs go to the blocking pool right away;
    /// async work starts when the returned future is first polled.
    pub fn start(self) -> BoxFuture<'static, Result<Value>> {
        match self {
            Self::Async(pending) => pending,
            Self::Blocking(job) => {
                let handle = tokio::task::spawn_blocking(job);
                async move {
                    handle
                        .await
                        .map_err(|e| AgentError::ToolExecution(format!("blocking tool task failed: {e}")))?
                }
                .boxed()
            }
        }
    }

    /// Run to completion
    pub async fn run(self) -> Result<Value> {
        self.start().await
    }
}

/// A registry entry bound to one agent's toolkit
#[derive(Clone, Debug)]
pub struct RegisteredTool {
    spec: Arc<ToolSpec>,
    description: String,
}

impl RegisteredTool {
    pub fn new(spec: Arc<ToolSpec>) -> Self {
        let description = spec.resolved_description();
        Self { spec, description }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_coroutine(&self) -> bool {
        self.spec.is_coroutine()
    }

    /// Name, description and parameter schema for the completion service
    pub fn schematize(&self) -> ToolSchema {
        ToolSchema {
            name: self.spec.name.clone(),
            description: self.description.clone(),
            parameters: self.spec.parameters.clone(),
        }
    }

    /// Bind arguments and return the matching execution wrapper.
    ///
    /// Arguments are validated inside the wrapper; failures are logged and
    /// returned to the caller unchanged.
    pub fn get_executable(&self, args: Value) -> Executable {
        let name = self.spec.name.clone();
        let args_repr = args.to_string();

        match &self.spec.callable {
            Callable::Blocking(func) => {
                let func = Arc::clone(func);
                Executable::Blocking(Box::new(move || {
                    let result = func(args);
                    if let Err(e) = &result {
                        tracing::error!(tool = %name, args = %args_repr, error = %e, "Error executing blocking tool");
                    }
                    result
                }))
            }
            Callable::Async(func) => {
                let pending = func(args);
                Executable::Async(
                    async move {
                        let result = pending.await;
                        if let Err(e) = &result {
                            tracing::error!(tool = %name, args = %args_repr, error = %e, "Error executing async tool");
                        }
                        result
                    }
                    .boxed(),
                )
            }
        }
    }
}

/// The tools one agent may call
#[derive(Debug, Default)]
pub struct Toolkit {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
    schemas: OnceLock<Vec<ToolSchema>>,
}

impl Toolkit {
    /// Toolkit without tools
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keep only the requested names. Unknown names are logged and skipped.
    pub fn from_registry<S: AsRef<str>>(registry: &ToolRegistry, names: &[S], agent_name: &str) -> Self {
        let mut toolkit = Self::empty();

        for name in names.iter().map(AsRef::as_ref) {
            if toolkit.tools.contains_key(name) {
                continue;
            }
            match registry.get(name) {
                Some(spec) => {
                    toolkit.order.push(name.to_owned());
                    toolkit.tools.insert(name.to_owned(), RegisteredTool::new(spec));
                }
                None => tracing::warn!(
                    tool = %name,
                    agent = %agent_name,
                    "Tool was requested but is not in the registry"
                ),
            }
        }

        if toolkit.is_empty() {
            tracing::info!(agent = %agent_name, "No tools provided for tool calling");
        } else {
            tracing::info!(agent = %agent_name, tools = ?toolkit.order, "Toolkit ready for tool calling");
        }
        toolkit
    }

    /// Resolve a tool name
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool names in the order they were requested
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Provider-facing schemas, computed on first use and then reused
    pub fn schematize(&self) -> &[ToolSchema] {
        self.schemas.get_or_init(|| {
            self.order
                .iter()
                .filter_map(|name| self.tools.get(name))
                .map(RegisteredTool::schematize)
                .collect()
        })
    }
}

/// A named group of tools defined together
pub trait ToolkitDefinition {
    /// Every tool this definition provides
    fn tools(&self) -> Vec<ToolSpec>;

    /// Names to hand to an agent's tool list
    fn extract_tool_names(&self) -> Vec<String> {
        let names: Vec<String> = self.tools().iter().map(|t| t.name().to_owned()).collect();
        tracing::debug!(tools = ?names, "Extracted toolkit tool names");
        names
    }

    /// Register every tool of this definition
    fn register_into(&self, registry: &mut ToolRegistry) -> Result<Vec<ToolHandle>> {
        self.tools().into_iter().map(|spec| registry.register(spec)).collect()
    }
}
