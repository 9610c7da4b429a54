//! Configuration, conversation memory and the tool-calling agent loop.
//!
//! [`bootstrap::bootstrap`] turns a [`config::Config`] into a ready
//! [`bootstrap::Session`]: backends chosen by mode, the index opened and
//! checked, tools registered. [`agent::AgentLoop`] then answers one user
//! message at a time.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod memory;
pub mod prompt;
pub mod secret;

pub use agent::{AgentError, AgentLoop, AgentReply, LoopState};
pub use bootstrap::{BootstrapError, Session, bootstrap};
pub use config::{Config, ConfigError, Mode};
pub use memory::{ConversationMemory, Turn, TurnRole};
