//! System prompt and the mapping from memory turns to model messages.

use std::fmt::Write;

use delver_llm::{Message, MessagePart, Role};

use crate::memory::{Turn, TurnRole};

const BASE_PROMPT: &str = "\
You are Delver, a senior software engineer answering questions about the \
codebase in the user's workspace.\n\
\n\
## Memory\n\
- You remember the earlier turns of this conversation. If the user says \
\"that file\" or \"they\", resolve it from the previous turns.\n\
- Correct obvious typos in identifiers: \"pineconeapi key\" means \
`PINECONE_API_KEY`.\n\
\n\
## Tools\n\
- Questions about behavior, hardcoded values, or counts require reading \
the code: call `read_file` before you analyze anything.\n\
- `file_structure` only lists names of classes and functions. `read_file` \
returns the actual code.\n\
- Use `exact_search` to locate a string or identifier anywhere in the \
project, and `search_code` for conceptual questions.\n\
- A result starting with `[degraded]` means semantic search was \
unavailable; rely on the exact matches it still contains.\n\
- A result starting with `[error]` is a failed call. Fix the arguments or \
try another tool.\n\
\n\
## Answers\n\
- Be concise. Cite locations as `path:line`.\n\
- Do not invent file contents. If you cannot find something, say so and \
suggest a near miss (\"Did you mean `ingest.py`?\").";

/// Facts about the session appended to the prompt.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub workspace: String,
    pub mode: String,
    pub model_name: String,
}

impl EnvironmentContext {
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::from("<environment>\n");
        let _ = writeln!(out, "  workspace: {}", self.workspace);
        let _ = writeln!(out, "  mode: {}", self.mode);
        let _ = writeln!(out, "  model: {}", self.model_name);
        out.push_str("</environment>");
        out
    }
}

#[must_use]
pub fn build_system_prompt(env: Option<&EnvironmentContext>) -> String {
    let mut prompt = BASE_PROMPT.to_owned();
    if let Some(env) = env {
        prompt.push_str("\n\n");
        prompt.push_str(&env.format());
    }
    prompt
}

/// Note sent with the tool-free call once the iteration bound is reached.
pub const BUDGET_EXHAUSTED_NOTE: &str = "The tool budget for this question is \
exhausted. Answer now from the results you already have, and say what you \
could not verify.";

/// Transient correction after an unusable reply.
pub const CORRECTIVE_NOTE: &str = "Your previous reply was empty or contained \
an unreadable tool call. Reply with either a plain-text answer or well-formed \
tool calls with JSON object arguments.";

/// Convert memory turns to provider messages.
///
/// Consecutive tool turns become one user message of tool results, placed
/// right after the assistant message that requested them.
#[must_use]
pub fn to_messages(turns: &[Turn]) -> Vec<Message> {
    let mut out = Vec::with_capacity(turns.len());
    let mut results: Vec<MessagePart> = Vec::new();

    for turn in turns {
        if turn.role != TurnRole::Tool && !results.is_empty() {
            out.push(Message::from_parts(Role::User, std::mem::take(&mut results)));
        }
        match turn.role {
            TurnRole::User => out.push(Message::user(turn.content.clone())),
            TurnRole::Agent if turn.has_tool_calls() => {
                let mut parts = Vec::with_capacity(turn.tool_calls.len() + 1);
                if !turn.content.is_empty() {
                    parts.push(MessagePart::Text {
                        text: turn.content.clone(),
                    });
                }
                parts.extend(turn.tool_calls.iter().map(|c| MessagePart::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.arguments.clone(),
                }));
                out.push(Message::from_parts(Role::Assistant, parts));
            }
            TurnRole::Agent => out.push(Message::assistant(turn.content.clone())),
            TurnRole::Tool => results.push(MessagePart::ToolResult {
                tool_use_id: turn.call_id.clone().unwrap_or_default(),
                content: turn.content.clone(),
                is_error: turn.flags.error,
            }),
        }
    }
    if !results.is_empty() {
        out.push(Message::from_parts(Role::User, results));
    }
    out
}

#[cfg(test)]
mod tests {
    use delver_tools::ToolResponse;

    use super::*;
    use crate::memory::ToolCallRecord;

    #[test]
    fn prompt_without_environment() {
        let prompt = build_system_prompt(None);
        assert!(prompt.contains("read_file"));
        assert!(prompt.contains("path:line"));
        assert!(!prompt.contains("<environment>"));
    }

    #[test]
    fn prompt_with_environment() {
        let env = EnvironmentContext {
            workspace: "/repo".into(),
            mode: "local".into(),
            model_name: "llama3.2".into(),
        };
        let prompt = build_system_prompt(Some(&env));
        assert!(prompt.ends_with("</environment>"));
        assert!(prompt.contains("  workspace: /repo\n"));
        assert!(prompt.contains("  model: llama3.2\n"));
    }

    #[test]
    fn tool_results_grouped_after_request() {
        let a = ToolCallRecord {
            id: "c1".into(),
            name: "list_files".into(),
            arguments: serde_json::json!({}),
        };
        let b = ToolCallRecord {
            id: "c2".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "x.py"}),
        };
        let turns = vec![
            Turn::user("what is here"),
            Turn::agent_calls("checking", vec![a.clone(), b.clone()]),
            Turn::tool(
                &a,
                ToolResponse {
                    success: true,
                    payload: Some("x.py".into()),
                    error: None,
                },
            ),
            Turn::tool(
                &b,
                ToolResponse {
                    success: false,
                    payload: None,
                    error: Some("file not found".into()),
                },
            ),
            Turn::agent("Only x.py."),
        ];

        let messages = to_messages(&turns);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].parts.len(), 3);
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(
            messages[2].parts[1],
            MessagePart::ToolResult {
                tool_use_id: "c2".into(),
                content: "[error] file not found".into(),
                is_error: true,
            }
        );
        assert_eq!(messages[3], Message::assistant("Only x.py."));
    }
}
