use std::path::Path;

use delver_index::exact::ExactMatcher;
use delver_index::retriever::HybridResults;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{retrieval_error, scope_arg};
use crate::error::ToolError;
use crate::output::ToolOutput;
use crate::tool::{Tool, ToolContext};

/// Hybrid exact + semantic code search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchCodeTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchCodeParams {
    /// What to look for: identifiers, an error message, or a natural-language
    /// description. Wrap in slashes (`/pattern/`) to force a regex.
    pub query: String,
    /// Maximum number of results to return, up to the configured limit.
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl Tool for SearchCodeTool {
    const NAME: &'static str = "search_code";
    const DESCRIPTION: &'static str = "Search the codebase by combining exact identifier \
        matches with semantic similarity. Start here when you do not know where something \
        lives. Results cite path:line for exact hits.";

    type Params = SearchCodeParams;

    async fn call(
        &self,
        params: SearchCodeParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        if params.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: Self::NAME.to_owned(),
                message: "query must not be empty".into(),
            });
        }
        let results = ctx
            .retriever
            .query(&params.query, params.max_results)
            .await
            .map_err(|e| retrieval_error(Self::NAME, e))?;
        Ok(ToolOutput::new(Self::NAME, results.render()))
    }
}

/// Line-oriented literal or regex search over raw files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSearchTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExactSearchParams {
    /// Text to find on a single line.
    pub pattern: String,
    /// Treat `pattern` as a regular expression instead of literal text.
    #[serde(default)]
    pub regex: bool,
    /// Restrict the search to this file or directory.
    #[serde(default)]
    pub path: Option<String>,
}

impl Tool for ExactSearchTool {
    const NAME: &'static str = "exact_search";
    const DESCRIPTION: &'static str = "Find every line matching a literal string or regex. \
        Output lines are formatted as path:line: text.";

    type Params = ExactSearchParams;

    async fn call(
        &self,
        params: ExactSearchParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        if params.pattern.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: Self::NAME.to_owned(),
                message: "pattern must not be empty".into(),
            });
        }
        let matcher = if params.regex {
            ExactMatcher::regex(&params.pattern)
        } else {
            ExactMatcher::literal(&params.pattern)
        }
        .map_err(|e| retrieval_error(Self::NAME, e))?;

        let scope = scope_arg(ctx, params.path.as_deref())?;
        let results = ctx
            .retriever
            .exact()
            .search(&matcher, scope.as_deref().map(Path::new))
            .await;
        Ok(ToolOutput::new(Self::NAME, results.render()))
    }
}

/// Vector-only search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticSearchTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SemanticSearchParams {
    /// Natural-language description of the code you are looking for.
    pub query: String,
    /// Number of nearest chunks to return, up to the configured limit.
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl Tool for SemanticSearchTool {
    const NAME: &'static str = "semantic_search";
    const DESCRIPTION: &'static str = "Find code chunks whose meaning is close to a \
        natural-language query, even when no identifier matches.";

    type Params = SemanticSearchParams;

    async fn call(
        &self,
        params: SemanticSearchParams,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let top_k = ctx.retriever.semantic_limit(params.top_k);
        let results = ctx
            .retriever
            .semantic(&params.query, top_k)
            .await
            .map_err(|e| retrieval_error(Self::NAME, e))?;
        let rendered = HybridResults {
            results,
            degraded: None,
        }
        .render();
        Ok(ToolOutput::new(Self::NAME, rendered))
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::builtin::test_support;
    use crate::tool::parse_params;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn exact_search_formats_path_line_text() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/auth.py", "import os\ndef validate_token(t):\n    return t\n");
        let ctx = test_support::context(dir.path()).await;
        let params: ExactSearchParams =
            parse_params("exact_search", serde_json::json!({"pattern": "validate_token"}))
                .unwrap();

        let out = ExactSearchTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.summary.contains("src/auth.py:2: def validate_token(t):"));
    }

    #[tokio::test]
    async fn exact_search_scoped_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/one.rs", "fn target() {}\n");
        write(dir.path(), "b/two.rs", "fn target() {}\n");
        let ctx = test_support::context(dir.path()).await;
        let params = ExactSearchParams {
            pattern: "target".into(),
            regex: false,
            path: Some("b".into()),
        };

        let out = ExactSearchTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.summary.contains("b/two.rs:1"));
        assert!(!out.summary.contains("a/one.rs"));
    }

    #[tokio::test]
    async fn bad_regex_is_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path()).await;
        let params = ExactSearchParams {
            pattern: "(unclosed".into(),
            regex: true,
            path: None,
        };
        let err = ExactSearchTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn scope_outside_workspace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path()).await;
        let params = ExactSearchParams {
            pattern: "x".into(),
            regex: false,
            path: Some("../".into()),
        };
        let err = ExactSearchTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox { .. }));
    }

    #[tokio::test]
    async fn search_code_on_empty_index_still_finds_exact_hits() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.rs", "pub fn parse_header() {}\n");
        let ctx = test_support::context(dir.path()).await;
        let params = SearchCodeParams {
            query: "where is parse_header defined".into(),
            max_results: None,
        };

        let out = SearchCodeTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.summary.contains("lib.rs:1"));
        assert!(out.summary.contains("exact"));
    }

    #[tokio::test]
    async fn search_code_ignores_oversized_max_results() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            write(dir.path(), &format!("m{i}.rs"), "const RETRY_LIMIT: u32 = 3;\n");
        }
        let ctx = test_support::context(dir.path()).await;
        let cap = ctx.retriever.config().max_results;
        let params = SearchCodeParams {
            query: "RETRY_LIMIT".into(),
            max_results: Some(100),
        };

        let out = SearchCodeTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.summary.matches("--- [").count(), cap);
    }

    #[tokio::test]
    async fn semantic_search_on_empty_index_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path()).await;
        let params = SemanticSearchParams {
            query: "authentication flow".into(),
            top_k: Some(3),
        };
        let out = SemanticSearchTool
            .call(params, &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.summary, "No relevant code found.");
    }
}
