//! Typed tool trait and its object-safe form used by the registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use delver_index::retriever::HybridRetriever;
use delver_index::workspace::Workspace;
use delver_llm::ToolDefinition;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsConfig;
use crate::error::ToolError;
use crate::output::ToolOutput;
use crate::sandbox::Sandbox;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared state every tool runs against.
pub struct ToolContext {
    pub sandbox: Sandbox,
    pub workspace: Workspace,
    pub retriever: Arc<HybridRetriever>,
    pub config: ToolsConfig,
    /// Deadline for external commands.
    pub command_timeout: Duration,
}

/// A named capability with a typed, schema-described argument struct.
pub trait Tool: Send + Sync + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    type Params: DeserializeOwned + JsonSchema + Send;

    fn call(
        &self,
        params: Self::Params,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ToolOutput, ToolError>> + Send;
}

pub(crate) trait ErasedTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn invoke<'a>(
        &'a self,
        args: serde_json::Value,
        ctx: &'a ToolContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>>;
}

impl<T: Tool> ErasedTool for T {
    fn definition(&self) -> ToolDefinition {
        definition_for::<T>()
    }

    fn invoke<'a>(
        &'a self,
        args: serde_json::Value,
        ctx: &'a ToolContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params = parse_params::<T::Params>(T::NAME, args)?;
            self.call(params, ctx, cancel).await
        })
    }
}

/// Tool definition with the JSON schema generated from `T::Params`.
#[must_use]
pub fn definition_for<T: Tool>() -> ToolDefinition {
    let schema = schemars::SchemaGenerator::default().into_root_schema_for::<T::Params>();
    let mut parameters = serde_json::to_value(&schema).unwrap_or_default();
    if let serde_json::Value::Object(ref mut map) = parameters {
        map.remove("$schema");
        map.remove("title");
    }
    ToolDefinition {
        name: T::NAME.to_owned(),
        description: T::DESCRIPTION.to_owned(),
        parameters,
    }
}

/// Check `args` against the parameter type before anything runs.
///
/// # Errors
///
/// Returns [`ToolError::InvalidArguments`] on missing, mistyped or unknown
/// fields.
pub fn parse_params<P: DeserializeOwned>(
    tool: &str,
    args: serde_json::Value,
) -> Result<P, ToolError> {
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_owned(),
        message: e.to_string(),
    })
}
