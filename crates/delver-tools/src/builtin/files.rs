use std::fmt::Write;
use std::path::Path;

use delver_index::languages::detect_language;
use delver_index::structure::{extract_structure, render_structure};
use delver_index::workspace::{FileContent, SkipReason, load_text};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::scope_arg;
use crate::error::ToolError;
use crate::output::ToolOutput;
use crate::tool::{Tool, ToolContext};

async fn read_source(path: &Path, display: &str) -> Result<String, ToolError> {
    match load_text(path).await? {
        FileContent::Text(text) => Ok(text),
        FileContent::Skipped(SkipReason::Unsupported) => Err(ToolError::execution(format!(
            "'{display}' is a document format this build cannot read"
        ))),
        FileContent::Skipped(_) => Err(ToolError::execution(format!(
            "'{display}' is a binary file"
        ))),
    }
}

/// Read a file with line numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFileTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadFileParams {
    /// Path relative to the workspace root. A bare file name is looked up
    /// across the workspace.
    pub path: String,
    /// First line to return, 1-based.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Tool for ReadFileTool {
    const NAME: &'static str = "read_file";
    const DESCRIPTION: &'static str = "Read a file's contents with line numbers. Accepts a \
        relative path or just a file name. Use offset and limit to page through long files.";

    type Params = ReadFileParams;

    async fn call(
        &self,
        params: ReadFileParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let path = ctx.sandbox.find_file(&ctx.workspace, &params.path)?;
        let rel = ctx.sandbox.relative(&path);
        let content = read_source(&path, &rel).await?;

        let total = content.lines().count();
        let skip = params.offset.unwrap_or(1).saturating_sub(1);
        let limit = params.limit.unwrap_or(usize::MAX);
        if total > 0 && skip >= total {
            return Err(ToolError::execution(format!(
                "offset {} is past the end of '{rel}' ({total} lines)",
                skip + 1
            )));
        }

        let mut body = String::new();
        let mut shown = 0usize;
        for (i, line) in content.lines().enumerate().skip(skip).take(limit) {
            let _ = writeln!(body, "{:>4}\t{line}", i + 1);
            shown += 1;
        }

        let max = ctx.config.max_read_chars;
        if body.chars().count() > max {
            let cut = body.char_indices().nth(max).map_or(body.len(), |(i, _)| i);
            body.truncate(cut);
            let _ = write!(
                body,
                "\n... [truncated at {max} characters; use offset/limit to read further]"
            );
        }

        let header = if shown == total {
            format!("File: {rel} ({total} lines)\n")
        } else {
            format!(
                "File: {rel} (lines {}-{} of {total})\n",
                skip + 1,
                skip + shown
            )
        };
        Ok(ToolOutput::new(Self::NAME, header + &body))
    }
}

/// Classes and functions of a source file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStructureTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileStructureParams {
    /// Source file to outline.
    pub path: String,
}

impl Tool for FileStructureTool {
    const NAME: &'static str = "file_structure";
    const DESCRIPTION: &'static str = "List the classes, functions and other declarations \
        of a source file with their line numbers. Cheaper than reading the whole file.";

    type Params = FileStructureParams;

    async fn call(
        &self,
        params: FileStructureParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let path = ctx.sandbox.find_file(&ctx.workspace, &params.path)?;
        let rel = ctx.sandbox.relative(&path);
        let Some(lang) = detect_language(&path) else {
            return Err(ToolError::execution(format!(
                "no structure parser for '{rel}'; use read_file instead"
            )));
        };
        let source = read_source(&path, &rel).await?;
        let symbols = extract_structure(&source, lang)
            .map_err(|e| ToolError::execution(format!("{rel}: {e}")))?;

        let summary = if symbols.is_empty() {
            format!("No classes or functions found in {rel}.")
        } else {
            format!("Structure of {rel} ({lang}):\n{}", render_structure(&symbols))
        };
        Ok(ToolOutput::new(Self::NAME, summary))
    }
}

/// Supported files under a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilesTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFilesParams {
    /// Directory to list, relative to the workspace root. Defaults to the root.
    #[serde(default)]
    pub path: Option<String>,
}

impl Tool for ListFilesTool {
    const NAME: &'static str = "list_files";
    const DESCRIPTION: &'static str = "List supported source and text files, recursively, \
        as sorted paths relative to the workspace root. Ignored directories are skipped.";

    type Params = ListFilesParams;

    async fn call(
        &self,
        params: ListFilesParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let files = match scope_arg(ctx, params.path.as_deref())? {
            Some(rel) => {
                let dir = ctx.workspace.absolute(&rel);
                if !dir.is_dir() {
                    return Err(ToolError::execution(format!("'{rel}' is not a directory")));
                }
                ctx.workspace.files_under(&dir)
            }
            None => ctx.workspace.files(),
        };

        let summary = if files.is_empty() {
            "No supported files found.".to_owned()
        } else {
            files.join("\n")
        };
        Ok(ToolOutput::new(Self::NAME, summary))
    }
}
