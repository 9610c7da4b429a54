use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use delver_llm::ToolDefinition;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::builtin::{
    ExactSearchTool, FileStructureTool, GitLogTool, ListFilesTool, ListPackagesTool,
    ReadFileTool, SearchCodeTool, SemanticSearchTool,
};
use crate::error::ToolError;
use crate::output::ToolOutput;
use crate::tool::{ErasedTool, Tool, ToolContext};

/// Extra time granted over the command deadline before dispatch gives up.
const DISPATCH_GRACE: Duration = Duration::from_secs(2);

/// Maps tool names to typed handlers and their schemas.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn ErasedTool>>,
    ctx: Arc<ToolContext>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: BTreeMap::new(),
            ctx: Arc::new(ctx),
        }
    }

    /// Registry with every built-in read-only tool.
    #[must_use]
    pub fn with_builtin_tools(ctx: ToolContext) -> Self {
        let mut registry = Self::new(ctx);
        registry.register(SearchCodeTool);
        registry.register(ExactSearchTool);
        registry.register(SemanticSearchTool);
        registry.register(ReadFileTool);
        registry.register(FileStructureTool);
        registry.register(ListFilesTool);
        registry.register(GitLogTool);
        registry.register(ListPackagesTool);
        registry
    }

    pub fn register<T: Tool>(&mut self, tool: T) {
        self.tools.insert(T::NAME, Box::new(tool));
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    #[must_use]
    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Validate `args` for `name`, run the tool, and cap its output.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] or [`ToolError::InvalidArguments`]
    /// before anything runs, otherwise the tool's own failure.
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = name, "model requested unknown tool");
            return Err(ToolError::UnknownTool {
                name: name.to_owned(),
            });
        };

        let budget = self.ctx.command_timeout + DISPATCH_GRACE;
        let span = tracing::info_span!("tool", name);
        async {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ToolError::Cancelled),
                r = tokio::time::timeout(budget, tool.invoke(args, &self.ctx, cancel)) => {
                    r.unwrap_or(Err(ToolError::Timeout {
                        timeout_secs: budget.as_secs(),
                        partial_output: None,
                    }))
                }
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &result {
                Ok(out) => tracing::info!(elapsed_ms, chars = out.summary.len(), "tool finished"),
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "tool failed"),
            }
            result.map(|out| out.limited(self.ctx.config.max_output_chars))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support;

    async fn registry(root: &std::path::Path) -> ToolRegistry {
        ToolRegistry::with_builtin_tools(test_support::context(root).await)
    }

    #[tokio::test]
    async fn builtin_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        assert_eq!(
            reg.names(),
            vec![
                "exact_search",
                "file_structure",
                "git_log",
                "list_files",
                "list_packages",
                "read_file",
                "search_code",
                "semantic_search",
            ]
        );
    }

    #[tokio::test]
    async fn definitions_carry_generated_schema() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        let defs = reg.definitions();
        let read = defs.iter().find(|d| d.name == "read_file").unwrap();
        assert!(!read.description.is_empty());
        assert_eq!(read.parameters["type"], "object");
        assert!(read.parameters["properties"]["path"].is_object());
        assert_eq!(read.parameters["required"], serde_json::json!(["path"]));
        assert!(read.parameters.get("$schema").is_none());
        assert!(read.parameters.get("title").is_none());
    }

    #[tokio::test]
    async fn unknown_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        let err = reg
            .dispatch("write_to_file", serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { ref name } if name == "write_to_file"));
    }

    #[tokio::test]
    async fn missing_and_unknown_arguments_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        let cancel = CancellationToken::new();

        let err = reg
            .dispatch("read_file", serde_json::json!({}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = reg
            .dispatch(
                "read_file",
                serde_json::json!({"path": "a.rs", "content": "x"}),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = reg
            .dispatch("git_log", serde_json::json!({"count": "three"}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn null_arguments_mean_no_arguments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let reg = registry(dir.path()).await;
        let out = reg
            .dispatch("list_files", serde_json::Value::Null, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.summary, "main.rs");
        assert_eq!(out.tool_name, "list_files");
    }

    #[tokio::test]
    async fn output_limit_applied() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            std::fs::write(dir.path().join(format!("file_{i:02}.rs")), "").unwrap();
        }
        let mut ctx = test_support::context(dir.path()).await;
        ctx.config.max_output_chars = 100;
        let reg = ToolRegistry::with_builtin_tools(ctx);

        let out = reg
            .dispatch("list_files", serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.truncated);
        assert!(out.summary.starts_with("file_00.rs"));
        assert!(out.summary.ends_with("file_49.rs"));
    }

    #[tokio::test]
    async fn cancelled_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reg
            .dispatch("list_files", serde_json::json!({}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
