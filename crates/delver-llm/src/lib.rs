//! Language-model and embedding providers behind one request/response contract.

pub mod any;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
mod retry;
pub mod tool_protocol;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{ChatResponse, LlmProvider, Message, MessagePart, Role, ToolDefinition};
