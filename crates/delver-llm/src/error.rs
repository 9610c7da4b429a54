#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable")]
    Unavailable,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    /// The model replied, but the reply could not be interpreted as an answer
    /// or a well-formed tool call.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same request later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited | Self::Unavailable => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
