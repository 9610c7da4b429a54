/// Errors returned by tool dispatch and execution.
///
/// None of these are fatal to the agent; they are handed back to the model
/// as error observations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{message}")]
    Execution {
        message: String,
        partial_output: Option<String>,
    },

    #[error("tool timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
        partial_output: Option<String>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("path escapes the workspace: {path}")]
    Sandbox { path: String },
}

impl ToolError {
    pub(crate) fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            partial_output: None,
        }
    }

    /// Output captured before the failure, if any.
    #[must_use]
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Self::Execution { partial_output, .. } | Self::Timeout { partial_output, .. } => {
                partial_output.as_deref()
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::execution(e.to_string())
    }
}
