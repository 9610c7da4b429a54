use delver_llm::LlmProvider;
use delver_llm::provider::ToolUseRequest;
use delver_tools::{ToolError, ToolResponse};
use tokio_util::sync::CancellationToken;

use super::{AgentLoop, AgentState, LoopState};
use crate::memory::{ToolCallRecord, Turn};

impl<P: LlmProvider> AgentLoop<P> {
    /// Record the request, then dispatch each call in order and record its
    /// result.
    ///
    /// Returns `false` when the turn was cancelled. Calls that never ran are
    /// still answered with a cancelled result so every request keeps its pair.
    pub(super) async fn execute_tool_calls(
        &mut self,
        turn: &mut AgentState,
        text: String,
        requests: Vec<ToolUseRequest>,
        cancel: &CancellationToken,
    ) -> bool {
        self.state = LoopState::ToolExecuting;
        let calls: Vec<ToolCallRecord> = requests
            .into_iter()
            .map(|r| ToolCallRecord {
                id: r.id,
                name: r.name,
                arguments: r.input,
            })
            .collect();
        self.memory
            .append(Turn::agent_calls(text, calls.clone()));

        for call in &calls {
            let result = if cancel.is_cancelled() {
                Err(ToolError::Cancelled)
            } else {
                tracing::debug!(tool = %call.name, id = %call.id, "dispatching");
                self.tools
                    .dispatch(&call.name, call.arguments.clone(), cancel)
                    .await
            };
            let response = ToolResponse::from_result(&result);
            let tool_turn = Turn::tool(call, response);

            turn.tools_used.push(call.name.clone());
            turn.degraded |= tool_turn.flags.degraded;
            turn.observations.push(tool_turn.content.clone());
            self.memory.append(tool_turn);
        }

        !cancel.is_cancelled()
    }
}
