#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("language model failed: {0}")]
    Llm(#[from] delver_llm::LlmError),

    #[error("language model did not answer within {secs}s")]
    LlmTimeout { secs: u64 },

    #[error(transparent)]
    Memory(#[from] crate::memory::MemoryError),

    #[error("session is closed")]
    SessionClosed,
}
