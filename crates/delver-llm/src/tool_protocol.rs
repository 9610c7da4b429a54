//! Fenced-block tool calling for models without a native tool API.
//!
//! The tool catalogue is rendered into the system prompt and the model is asked
//! to answer either with plain text or with one or more blocks of the form:
//!
//! ````text
//! ```tool_call
//! {"name": "read_file", "arguments": {"path": "src/lib.rs"}}
//! ```
//! ````

use std::fmt::Write;

use serde::Deserialize;

use crate::error::LlmError;
use crate::provider::{ChatResponse, ToolDefinition, ToolUseRequest};

const OPEN_FENCE: &str = "```tool_call";
const CLOSE_FENCE: &str = "```";

#[derive(Deserialize)]
struct RawCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Render tool definitions as prompt text.
#[must_use]
pub fn render_catalog(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "To call a tool, reply with one or more blocks exactly like:\n\
         ```tool_call\n{\"name\": \"<tool>\", \"arguments\": { ... }}\n```\n\
         Reply with plain text and no tool_call block once you can answer.\n\n\
         Available tools:\n",
    );
    for tool in tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        let _ = writeln!(out, "  arguments schema: {}", tool.parameters);
    }
    out
}

/// Interpret a raw model reply.
///
/// # Errors
///
/// Returns [`LlmError::MalformedOutput`] when the reply is empty, a block is
/// left unterminated, or a block does not hold a `{name, arguments}` object.
pub fn parse_reply(reply: &str) -> Result<ChatResponse, LlmError> {
    let mut rest = reply;
    let mut prose = String::new();
    let mut calls = Vec::new();

    while let Some(start) = rest.find(OPEN_FENCE) {
        prose.push_str(&rest[..start]);
        let body_start = start + OPEN_FENCE.len();
        let Some(len) = rest[body_start..].find(CLOSE_FENCE) else {
            return Err(LlmError::MalformedOutput(
                "unterminated tool_call block".into(),
            ));
        };
        let body = rest[body_start..body_start + len].trim();
        let raw: RawCall = serde_json::from_str(body)
            .map_err(|e| LlmError::MalformedOutput(format!("invalid tool_call JSON: {e}")))?;
        if raw.name.trim().is_empty() {
            return Err(LlmError::MalformedOutput("tool_call without a name".into()));
        }
        let input = if raw.arguments.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            raw.arguments
        };
        calls.push(ToolUseRequest {
            id: new_call_id(),
            name: raw.name,
            input,
        });
        rest = &rest[body_start + len + CLOSE_FENCE.len()..];
    }
    prose.push_str(rest);
    let prose = prose.trim();

    if calls.is_empty() {
        if prose.is_empty() {
            return Err(LlmError::MalformedOutput("empty reply".into()));
        }
        return Ok(ChatResponse::Text(prose.to_owned()));
    }

    Ok(ChatResponse::ToolUse {
        text: (!prose.is_empty()).then(|| prose.to_owned()),
        tool_calls: calls,
    })
}

pub(crate) fn new_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..12])
}
