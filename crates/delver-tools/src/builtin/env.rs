use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::scope_arg;
use crate::command::run_command;
use crate::error::ToolError;
use crate::output::ToolOutput;
use crate::tool::{Tool, ToolContext};

/// Recent commits touching a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitLogTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GitLogParams {
    /// File or directory to inspect. Defaults to the whole repository.
    #[serde(default)]
    pub path: Option<String>,
    /// Number of commits to show.
    #[serde(default)]
    pub count: Option<usize>,
}

impl Tool for GitLogTool {
    const NAME: &'static str = "git_log";
    const DESCRIPTION: &'static str = "Show recent git commits (hash, author, date, subject) \
        for a file or the whole repository.";

    type Params = GitLogParams;

    async fn call(
        &self,
        params: GitLogParams,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let scope = scope_arg(ctx, params.path.as_deref())?;
        let count = params.count.unwrap_or(ctx.config.git_log_count).max(1);
        let count = count.to_string();

        let mut args = vec![
            "log",
            "-n",
            count.as_str(),
            "--pretty=format:%h %an %ad %s",
            "--date=short",
        ];
        if let Some(rel) = scope.as_deref() {
            args.extend(["--", rel]);
        }

        let out = run_command(
            "git",
            &args,
            ctx.sandbox.root(),
            ctx.command_timeout,
            ctx.config.max_output_chars,
            cancel,
        )
        .await?;
        let out = out.trim_end();
        let summary = if out.is_empty() {
            "No history.".to_owned()
        } else {
            out.to_owned()
        };
        Ok(ToolOutput::new(Self::NAME, summary))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    Node,
    Rust,
}

impl Ecosystem {
    fn command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Python => ("pip", &["list"]),
            Self::Node => ("npm", &["list", "--depth=0"]),
            Self::Rust => ("cargo", &["tree", "--depth", "1"]),
        }
    }
}

/// Installed packages for one ecosystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListPackagesTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListPackagesParams {
    /// Package ecosystem to query.
    pub ecosystem: Ecosystem,
}

impl Tool for ListPackagesTool {
    const NAME: &'static str = "list_packages";
    const DESCRIPTION: &'static str = "List installed dependencies for the project: pip \
        packages (python), top-level npm packages (node), or direct crate dependencies (rust).";

    type Params = ListPackagesParams;

    async fn call(
        &self,
        params: ListPackagesParams,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let (program, args) = params.ecosystem.command();
        let out = run_command(
            program,
            args,
            ctx.sandbox.root(),
            ctx.command_timeout,
            ctx.config.max_output_chars,
            cancel,
        )
        .await?;
        let out = out.trim_end();
        let summary = if out.is_empty() {
            "No packages found.".to_owned()
        } else {
            out.to_owned()
        };
        Ok(ToolOutput::new(Self::NAME, summary))
    }
}
