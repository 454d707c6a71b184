//! Tool-Calling Cycle
//!
//! After the first completion, the client keeps executing the tool calls the
//! model asks for and feeding their results back until the model answers
//! without tool calls or the interaction limit is reached.
//!
//! ```text
//! completion ──► has tool calls? ──no──► done
//!                   │ yes
//!                   ▼
//!             rounds < limit? ──no──► done (warn, pending calls dropped)
//!                   │ yes
//!                   ▼
//!         execute batch ──► new completion ──► (loop)
//! ```

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::client::ProviderClient;
use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::provider::Completion;
use crate::tool::ToolCall;

type PendingTool = BoxFuture<'static, (ToolCall, Result<Value>)>;

/// Content of the tool message sent for an unknown tool
pub fn tool_not_found_message(name: &str) -> String {
    format!("Error: Tool '{name}' not found.")
}

/// Strings are sent as-is, everything else as compact JSON
fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn with_deadline(call: ToolCall, deadline: Option<(Instant, Duration)>, work: BoxFuture<'static, Result<Value>>) -> PendingTool {
    async move {
        let result = match deadline {
            Some((at, budget)) => tokio::time::timeout_at(at, work).await.unwrap_or_else(|_| {
                Err(AgentError::Timeout(format!("tool '{}' exceeded {budget:?}", call.name)))
            }),
            None => work.await,
        };
        (call, result)
    }
    .boxed()
}

impl ProviderClient {
    /// Run tool-calling rounds until the model stops asking for tools or the
    /// interaction limit is hit. Returns the last completion.
    pub async fn complete_tool_calling_cycle(
        &self,
        mut completion: Completion,
        conversation: &mut Conversation,
    ) -> Result<Completion> {
        loop {
            conversation.push(Message::assistant_with_tool_calls(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));
            tracing::debug!(
                requested = completion.tool_calls.len(),
                calls = ?completion.tool_calls,
                "Tool calls requested"
            );

            if !completion.has_tool_calls() {
                return Ok(completion);
            }

            let rounds = self.rounds.load(Ordering::SeqCst);
            if rounds >= self.interactions_limit {
                tracing::warn!(
                    rounds,
                    pending = completion.tool_calls.len(),
                    "Exiting tool-calling cycle early, interaction limit reached"
                );
                return Ok(completion);
            }

            let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
            let span = tracing::info_span!("interaction", interaction_number = round);
            let calls = std::mem::take(&mut completion.tool_calls);

            completion = async {
                self.execute_tool_batch(calls, conversation).await?;
                self.generate_completion(conversation.messages(), Some(self.toolkit.schematize()))
                    .await
            }
            .instrument(span)
            .await?;
        }
    }

    /// Execute one batch of tool calls and append a tool message per result.
    ///
    /// Unknown tools get a "not found" message and do not stop the batch.
    /// Async tools run concurrently on this task, blocking tools on the
    /// blocking pool. Async results are appended first, each group in
    /// completion order. The first failure aborts the batch.
    pub async fn execute_tool_batch(&self, calls: Vec<ToolCall>, conversation: &mut Conversation) -> Result<()> {
        let mut async_group: FuturesUnordered<PendingTool> = FuturesUnordered::new();
        let mut blocking_group: FuturesUnordered<PendingTool> = FuturesUnordered::new();

        for call in calls {
            let Some(tool) = self.toolkit.get(&call.name) else {
                tracing::warn!(tool = %call.name, call_id = %call.id, "Tool requested by the model but not found in toolkit");
                conversation.push(Message::tool(tool_not_found_message(&call.name), &call.id, &call.name));
                continue;
            };

            let args = call.parse_arguments()?;
            let coroutine = tool.is_coroutine();
            // A budget past the clock's range means no deadline
            let deadline = self
                .tool_timeout
                .and_then(|budget| Instant::now().checked_add(budget).map(|at| (at, budget)));
            let pending = with_deadline(call, deadline, tool.get_executable(args).start());

            if coroutine {
                async_group.push(pending);
            } else {
                blocking_group.push(pending);
            }
        }

        for (kind, group) in [("async", &mut async_group), ("blocking", &mut blocking_group)] {
            while let Some((call, result)) = group.next().await {
                let output = result.inspect_err(|e| {
                    tracing::error!(tool = %call.name, kind, error = %e, "Tool call failed");
                })?;
                tracing::debug!(tool = %call.name, kind, output = %output, "Tool call completed");
                conversation.push(Message::tool(render_output(&output), call.id, call.name));
            }
        }

        Ok(())
    }
}
