//! Read-only tools the agent can call, and the registry that dispatches them.
//!
//! Every tool declares a typed parameter struct; its JSON schema is generated
//! with `schemars` and arguments are checked against it before execution.
//! Path arguments are confined to the workspace root by [`sandbox::Sandbox`].

pub mod builtin;
pub mod command;
pub mod config;
pub mod error;
pub mod output;
pub mod registry;
pub mod sandbox;
pub mod tool;

pub use config::ToolsConfig;
pub use error::ToolError;
pub use output::{DEFAULT_MAX_OUTPUT_CHARS, ToolOutput, ToolResponse, truncate_tool_output};
pub use registry::ToolRegistry;
pub use sandbox::Sandbox;
pub use tool::{Tool, ToolContext};
