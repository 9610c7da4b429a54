//! The think/act/observe loop.

pub mod error;
mod tool_execution;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::time::Duration;

use delver_llm::{ChatResponse, LlmError, LlmProvider, Message};
use delver_tools::{ToolRegistry, truncate_tool_output};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::memory::{ConversationMemory, Turn, TurnFlags};
use crate::prompt::{BUDGET_EXHAUSTED_NOTE, CORRECTIVE_NOTE, to_messages};

pub use error::AgentError;

/// Content of the marker turn left by an interrupted turn.
pub const CANCELLED_MARKER: &str = "[cancelled by user]";

const APOLOGY: &str = "Sorry, I could not produce a usable answer to that. \
Please try rephrasing the question.";

/// Corrective retries allowed after an unusable model reply.
const MALFORMED_RETRIES: usize = 1;

/// Characters of the last observation quoted in a synthesized answer.
const SYNTHESIS_CHARS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Thinking,
    ToolExecuting,
    Responding,
    Done,
}

/// Bookkeeping for the turn in progress.
#[derive(Debug, Default)]
pub struct AgentState {
    pub tools_used: Vec<String>,
    pub observations: Vec<String>,
    pub iterations: usize,
    pub degraded: bool,
    malformed_streak: usize,
}

/// What the user sees for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    /// The answer was forced before the model finished.
    pub incomplete: bool,
    pub cancelled: bool,
    /// At least one observation came from a degraded retrieval.
    pub degraded: bool,
    pub tools_used: Vec<String>,
    pub iterations: usize,
}

enum Call<T> {
    Done(Result<T, LlmError>),
    TimedOut,
    Cancelled,
}

async fn guarded<T>(
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, LlmError>>,
) -> Call<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Call::Cancelled,
        r = tokio::time::timeout(limit, fut) => r.map_or(Call::TimedOut, Call::Done),
    }
}

pub struct AgentLoop<P: LlmProvider> {
    provider: P,
    tools: ToolRegistry,
    memory: ConversationMemory,
    system_prompt: String,
    max_tool_iterations: usize,
    context_budget: usize,
    llm_timeout: Duration,
    state: LoopState,
}

impl<P: LlmProvider> AgentLoop<P> {
    #[must_use]
    pub fn new(provider: P, tools: ToolRegistry, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            memory: ConversationMemory::new(),
            system_prompt: system_prompt.into(),
            max_tool_iterations: 10,
            context_budget: 8000,
            llm_timeout: Duration::from_secs(120),
            state: LoopState::Idle,
        }
    }

    #[must_use]
    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    /// Token budget for the system prompt plus the conversation view.
    #[must_use]
    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_budget = tokens;
        self
    }

    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// End the session. Every later [`handle`](Self::handle) fails.
    pub fn shutdown(&mut self) {
        tracing::info!(turns = self.memory.len(), "session closed");
        self.state = LoopState::Done;
    }

    /// Serialize the transcript.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_transcript(&self) -> Result<String, AgentError> {
        Ok(self.memory.export_json()?)
    }

    /// Replace the conversation with an exported transcript.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid transcript or a closed session.
    pub fn import_transcript(&mut self, json: &str) -> Result<(), AgentError> {
        if self.state == LoopState::Done {
            return Err(AgentError::SessionClosed);
        }
        self.memory = ConversationMemory::import_json(json)?;
        Ok(())
    }

    /// Process one user message to completion.
    ///
    /// Tool failures, malformed model output, the iteration bound and
    /// cancellation all end in an [`AgentReply`]. The loop is back in
    /// [`LoopState::Idle`] when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::LlmTimeout`] or [`AgentError::Llm`] when the
    /// model cannot be reached, and [`AgentError::SessionClosed`] after
    /// [`shutdown`](Self::shutdown).
    pub async fn handle(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        if self.state == LoopState::Done {
            return Err(AgentError::SessionClosed);
        }
        self.memory.append(Turn::user(input));

        let span = tracing::info_span!("turn", n = self.memory.len());
        let mut turn = AgentState::default();
        let result = self.run_turn(&mut turn, cancel).instrument(span).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "turn failed");
        }
        self.state = LoopState::Idle;
        result
    }

    async fn run_turn(
        &mut self,
        turn: &mut AgentState,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        let definitions = self.tools.definitions();

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(turn));
            }
            if turn.iterations >= self.max_tool_iterations {
                tracing::warn!(
                    iterations = turn.iterations,
                    "tool iteration limit reached, forcing an answer"
                );
                return Ok(self.exhausted(turn, cancel).await);
            }

            self.state = LoopState::Thinking;
            let messages = self.request(turn.malformed_streak > 0);
            let call = guarded(
                self.llm_timeout,
                cancel,
                self.provider.chat_with_tools(&messages, &definitions),
            )
            .await;

            let response = match call {
                Call::Cancelled => return Ok(self.cancelled(turn)),
                Call::TimedOut => {
                    return Err(AgentError::LlmTimeout {
                        secs: self.llm_timeout.as_secs(),
                    });
                }
                Call::Done(Err(LlmError::MalformedOutput(detail))) => {
                    tracing::warn!(%detail, "malformed model output");
                    None
                }
                Call::Done(Err(e)) => return Err(e.into()),
                Call::Done(Ok(r)) => Some(r),
            };

            match response {
                Some(ChatResponse::Text(text)) if !text.trim().is_empty() => {
                    return Ok(self.respond(turn, text, TurnFlags::default()));
                }
                Some(ChatResponse::ToolUse { text, tool_calls }) if !tool_calls.is_empty() => {
                    turn.malformed_streak = 0;
                    turn.iterations += 1;
                    let completed = self
                        .execute_tool_calls(turn, text.unwrap_or_default(), tool_calls, cancel)
                        .await;
                    if !completed {
                        return Ok(self.cancelled(turn));
                    }
                }
                Some(ChatResponse::ToolUse {
                    text: Some(text), ..
                }) if !text.trim().is_empty() => {
                    return Ok(self.respond(turn, text, TurnFlags::default()));
                }
                _ => {
                    turn.malformed_streak += 1;
                    if turn.malformed_streak > MALFORMED_RETRIES {
                        tracing::warn!("model output still unusable, giving up on this turn");
                        let flags = TurnFlags {
                            incomplete: true,
                            ..TurnFlags::default()
                        };
                        return Ok(self.respond(turn, APOLOGY.to_owned(), flags));
                    }
                    tracing::debug!("retrying with corrective note");
                }
            }
        }
    }

    /// System prompt plus the budgeted conversation view.
    fn request(&self, corrective: bool) -> Vec<Message> {
        let prompt_tokens = self.system_prompt.chars().count().div_ceil(4);
        let budget = self.context_budget.saturating_sub(prompt_tokens);
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(to_messages(self.memory.view(budget)));
        if corrective {
            messages.push(Message::user(CORRECTIVE_NOTE));
        }
        messages
    }

    async fn exhausted(&mut self, turn: &AgentState, cancel: &CancellationToken) -> AgentReply {
        self.state = LoopState::Thinking;
        let mut messages = self.request(false);
        messages.push(Message::user(BUDGET_EXHAUSTED_NOTE));

        let text = match guarded(self.llm_timeout, cancel, self.provider.chat(&messages)).await {
            Call::Cancelled => return self.cancelled(turn),
            Call::Done(Ok(text)) if !text.trim().is_empty() => text,
            Call::Done(Ok(_)) => synthesize(turn),
            Call::Done(Err(e)) => {
                tracing::warn!(error = %e, "final answer call failed, synthesizing");
                synthesize(turn)
            }
            Call::TimedOut => {
                tracing::warn!("final answer call timed out, synthesizing");
                synthesize(turn)
            }
        };
        let flags = TurnFlags {
            incomplete: true,
            ..TurnFlags::default()
        };
        self.respond(turn, text, flags)
    }

    fn respond(&mut self, turn: &AgentState, text: String, flags: TurnFlags) -> AgentReply {
        self.state = LoopState::Responding;
        let flags = TurnFlags {
            degraded: turn.degraded,
            ..flags
        };
        self.memory.append(Turn::agent(text.clone()).with_flags(flags));
        self.state = LoopState::Idle;
        tracing::info!(
            iterations = turn.iterations,
            tools = turn.tools_used.len(),
            incomplete = flags.incomplete,
            "answered"
        );
        AgentReply {
            text,
            incomplete: flags.incomplete,
            cancelled: false,
            degraded: turn.degraded,
            tools_used: turn.tools_used.clone(),
            iterations: turn.iterations,
        }
    }

    fn cancelled(&mut self, turn: &AgentState) -> AgentReply {
        tracing::info!(iterations = turn.iterations, "turn cancelled");
        let flags = TurnFlags {
            cancelled: true,
            ..TurnFlags::default()
        };
        self.memory
            .append(Turn::agent(CANCELLED_MARKER).with_flags(flags));
        self.state = LoopState::Idle;
        AgentReply {
            text: CANCELLED_MARKER.to_owned(),
            incomplete: true,
            cancelled: true,
            degraded: turn.degraded,
            tools_used: turn.tools_used.clone(),
            iterations: turn.iterations,
        }
    }
}

fn synthesize(turn: &AgentState) -> String {
    match turn.observations.last() {
        Some(obs) => {
            let (quoted, _) = truncate_tool_output(obs, SYNTHESIS_CHARS);
            format!(
                "I reached the tool-call limit before finishing. The last result was:\n\n{quoted}"
            )
        }
        None => "I reached the tool-call limit before finishing and have no results to report."
            .to_owned(),
    }
}
