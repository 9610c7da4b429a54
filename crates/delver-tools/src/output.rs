use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

/// Structured result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub tool_name: String,
    pub summary: String,
    /// `summary` was cut to fit the output limit.
    pub truncated: bool,
}

impl ToolOutput {
    #[must_use]
    pub fn new(tool_name: &str, summary: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            summary: summary.into(),
            truncated: false,
        }
    }

    /// Apply the head+tail limit in place.
    #[must_use]
    pub fn limited(mut self, max_chars: usize) -> Self {
        let (text, cut) = truncate_tool_output(&self.summary, max_chars);
        if cut {
            self.summary = text;
            self.truncated = true;
        }
        self
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

/// Wire form of a tool result: `{success, payload | error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    #[must_use]
    pub fn from_result(result: &Result<ToolOutput, ToolError>) -> Self {
        match result {
            Ok(out) => Self {
                success: true,
                payload: Some(out.summary.clone()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                payload: e.partial_output().map(str::to_owned),
                error: Some(e.to_string()),
            },
        }
    }

    /// Text handed to the model as the observation.
    #[must_use]
    pub fn observation(&self) -> String {
        match (&self.error, &self.payload) {
            (None, Some(p)) => p.clone(),
            (None, None) => "(no output)".to_owned(),
            (Some(e), None) => format!("[error] {e}"),
            (Some(e), Some(partial)) => format!("[error] {e}\n[partial output]\n{partial}"),
        }
    }
}

/// Keep the first and last halves of `output` when it exceeds `max_chars`.
///
/// Returns the text and whether anything was removed.
#[must_use]
pub fn truncate_tool_output(output: &str, max_chars: usize) -> (String, bool) {
    let total = output.chars().count();
    if total <= max_chars {
        return (output.to_owned(), false);
    }
    let half = max_chars / 2;
    let head_end = byte_offset(output, half);
    let tail_start = byte_offset(output, total - half);
    let removed = total - 2 * half;
    (
        format!(
            "{}\n\n... [truncated {removed} chars, showing first and last ~{half} chars] ...\n\n{}",
            &output[..head_end],
            &output[tail_start..]
        ),
        true,
    )
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}
