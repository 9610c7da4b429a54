use serde::Deserialize;

use crate::output::DEFAULT_MAX_OUTPUT_CHARS;

fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

fn default_max_read_chars() -> usize {
    20_000
}

fn default_git_log_count() -> usize {
    3
}

/// Output limits and defaults for the built-in tools.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Head+tail cap applied to every tool result.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// `read_file` content cap.
    #[serde(default = "default_max_read_chars")]
    pub max_read_chars: usize,
    /// Default commit count for `git_log`.
    #[serde(default = "default_git_log_count")]
    pub git_log_count: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
            max_read_chars: default_max_read_chars(),
            git_log_count: default_git_log_count(),
        }
    }
}
