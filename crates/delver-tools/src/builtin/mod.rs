//! The read-only tools exposed to the agent.

mod env;
mod files;
mod search;

pub use env::{Ecosystem, GitLogParams, GitLogTool, ListPackagesParams, ListPackagesTool};
pub use files::{
    FileStructureParams, FileStructureTool, ListFilesParams, ListFilesTool, ReadFileParams,
    ReadFileTool,
};
pub use search::{
    ExactSearchParams, ExactSearchTool, SearchCodeParams, SearchCodeTool, SemanticSearchParams,
    SemanticSearchTool,
};

use delver_index::RetrievalError;

use crate::error::ToolError;
use crate::tool::ToolContext;

fn retrieval_error(tool: &str, e: RetrievalError) -> ToolError {
    match e {
        RetrievalError::InvalidPattern(err) => ToolError::InvalidArguments {
            tool: tool.to_owned(),
            message: format!("invalid regex: {err}"),
        },
        other => ToolError::execution(other.to_string()),
    }
}

/// Workspace-relative form of an optional path argument. `None` and the root
/// itself both mean "everything".
fn scope_arg(ctx: &ToolContext, path: Option<&str>) -> Result<Option<String>, ToolError> {
    let Some(path) = path.map(str::trim).filter(|p| !p.is_empty() && *p != ".") else {
        return Ok(None);
    };
    let resolved = ctx.sandbox.resolve(path)?;
    if !resolved.exists() {
        return Err(ToolError::execution(format!("path '{path}' not found")));
    }
    let rel = ctx.sandbox.relative(&resolved);
    Ok((!rel.is_empty()).then_some(rel))
}
