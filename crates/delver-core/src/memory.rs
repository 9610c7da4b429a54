//! Session transcript with a budgeted, pairing-preserving view.
//!
//! The log is append-only. [`ConversationMemory::view`] returns the newest
//! contiguous run of whole units that fits a token budget, where a unit is a
//! user turn, a plain agent turn, or an agent tool-call turn together with
//! the tool turns answering it.

use std::ops::Range;

use delver_tools::ToolResponse;
use serde::{Deserialize, Serialize};

/// Current transcript format.
pub const TRANSCRIPT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("transcript is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported transcript version {found} (expected {TRANSCRIPT_VERSION})")]
    Version { found: u32 },

    #[error("tool turn {index} does not answer a pending tool call")]
    Unpaired { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFlags {
    /// Answer forced by the iteration bound or a give-up path.
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub cancelled: bool,
    /// Observation produced while a retrieval backend was unavailable.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub error: bool,
}

impl TurnFlags {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Calls requested by an agent turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// On tool turns, the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResponse>,
    #[serde(default, skip_serializing_if = "TurnFlags::is_empty")]
    pub flags: TurnFlags,
}

impl Turn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            arguments: None,
            call_id: None,
            result: None,
            flags: TurnFlags::default(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    #[must_use]
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Agent, content)
    }

    /// Agent turn requesting `calls`, with any reasoning text the model sent.
    #[must_use]
    pub fn agent_calls(content: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(TurnRole::Agent, content)
        }
    }

    /// Tool turn answering `call`. The content is the observation shown to
    /// the model.
    #[must_use]
    pub fn tool(call: &ToolCallRecord, response: ToolResponse) -> Self {
        let content = response.observation();
        let flags = TurnFlags {
            error: !response.success,
            degraded: content.starts_with("[degraded]"),
            ..TurnFlags::default()
        };
        Self {
            tool_name: Some(call.name.clone()),
            arguments: Some(call.arguments.clone()),
            call_id: Some(call.id.clone()),
            result: Some(response),
            flags,
            ..Self::new(TurnRole::Tool, content)
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TurnFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.role == TurnRole::Agent && !self.tool_calls.is_empty()
    }

    /// Rough token count: characters over four, arguments included.
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        let mut chars = self.content.chars().count();
        for call in &self.tool_calls {
            chars += call.name.len() + call.arguments.to_string().chars().count();
        }
        if let Some(args) = &self.arguments {
            chars += args.to_string().chars().count();
        }
        chars.div_ceil(4)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Transcript {
    version: u32,
    turns: Vec<Turn>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Index ranges of the compaction units, oldest first.
    #[must_use]
    pub fn units(&self) -> Vec<Range<usize>> {
        let mut units = Vec::new();
        let mut i = 0;
        while i < self.turns.len() {
            let start = i;
            let opens_group = self.turns[i].has_tool_calls();
            i += 1;
            if opens_group || self.turns[start].role == TurnRole::Tool {
                while i < self.turns.len() && self.turns[i].role == TurnRole::Tool {
                    i += 1;
                }
            }
            units.push(start..i);
        }
        units
    }

    /// Newest whole units whose estimated size fits `budget` tokens.
    ///
    /// Everything from the latest user turn onward is always included, so the
    /// question being answered and its tool results survive even when they
    /// alone are over budget. Older units fill whatever budget remains.
    #[must_use]
    pub fn view(&self, budget: usize) -> &[Turn] {
        let current = self
            .turns
            .iter()
            .rposition(|t| t.role == TurnRole::User)
            .unwrap_or(self.turns.len());
        let mut start = self.turns.len();
        let mut used = 0usize;
        for unit in self.units().into_iter().rev() {
            let cost: usize = self.turns[unit.clone()]
                .iter()
                .map(Turn::estimated_tokens)
                .sum();
            let required = unit.end == self.turns.len() || unit.start >= current;
            if !required && used + cost > budget {
                break;
            }
            used += cost;
            start = unit.start;
        }
        if start > 0 {
            tracing::debug!(dropped = start, kept = self.turns.len() - start, "compacted view");
        }
        &self.turns[start..]
    }

    /// Serialize the whole log as `{version, turns}`.
    ///
    /// # Errors
    ///
    /// Returns an error if a turn cannot be serialized.
    pub fn export_json(&self) -> Result<String, MemoryError> {
        let transcript = Transcript {
            version: TRANSCRIPT_VERSION,
            turns: self.turns.clone(),
        };
        Ok(serde_json::to_string_pretty(&transcript)?)
    }

    /// Rebuild a memory from an exported transcript.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, an unknown version, or a tool
    /// turn that does not answer a call of the preceding agent turn.
    pub fn import_json(json: &str) -> Result<Self, MemoryError> {
        let transcript: Transcript = serde_json::from_str(json)?;
        if transcript.version != TRANSCRIPT_VERSION {
            return Err(MemoryError::Version {
                found: transcript.version,
            });
        }
        check_pairing(&transcript.turns)?;
        Ok(Self {
            turns: transcript.turns,
        })
    }
}

/// Every tool turn must answer a call of the agent turn that opened its
/// group, and every call must be answered before the next user or agent turn.
fn check_pairing(turns: &[Turn]) -> Result<(), MemoryError> {
    let mut pending: Vec<&str> = Vec::new();
    let mut opened_at = 0;
    for (index, turn) in turns.iter().enumerate() {
        if turn.role != TurnRole::Tool && !pending.is_empty() {
            return Err(MemoryError::Unpaired { index: opened_at });
        }
        match turn.role {
            TurnRole::Tool => {
                let answered = turn
                    .call_id
                    .as_deref()
                    .and_then(|id| pending.iter().position(|p| *p == id));
                match answered {
                    Some(pos) => {
                        pending.remove(pos);
                    }
                    None => return Err(MemoryError::Unpaired { index }),
                }
            }
            TurnRole::Agent => {
                pending = turn.tool_calls.iter().map(|c| c.id.as_str()).collect();
                opened_at = index;
            }
            TurnRole::User => {}
        }
    }
    if pending.is_empty() {
        Ok(())
    } else {
        Err(MemoryError::Unpaired { index: opened_at })
    }
}
