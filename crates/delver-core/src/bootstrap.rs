//! Session construction: backends chosen by mode, index opened, tools wired.
//!
//! Every configuration problem surfaces here, before the first question.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use delver_index::IndexError;
use delver_index::chunker::{Chunker, ChunkerConfig};
use delver_index::db::{SqlitePool, open_index_db};
use delver_index::embedder::{EmbedError, Embedder, ProviderEmbedder};
use delver_index::exact::ExactSearch;
use delver_index::local_store::LocalStore;
use delver_index::manifest::IngestManifest;
use delver_index::pipeline::{IngestReport, IngestionPipeline};
use delver_index::qdrant_store::QdrantStore;
use delver_index::retriever::{HybridRetriever, RetrievalConfig};
use delver_index::vector_store::{VectorStore, VectorStoreError, with_timeout};
use delver_index::workspace::Workspace;
use delver_llm::AnyProvider;
use delver_llm::ollama::OllamaProvider;
use delver_llm::openai::OpenAiProvider;
use delver_tools::sandbox::Sandbox;
use delver_tools::{ToolContext, ToolRegistry};

use crate::agent::AgentLoop;
use crate::config::{Config, ConfigError, Mode};
use crate::prompt::{EnvironmentContext, build_system_prompt};
use crate::secret::Secret;

/// File holding local vectors and the ingestion manifest.
pub const INDEX_DB_FILE: &str = "index.db";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("workspace root {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding backend unavailable: {0}")]
    Embedder(EmbedError),

    #[error("vector store unavailable: {0}")]
    Store(VectorStoreError),

    #[error("index database unavailable: {0}")]
    Index(#[from] IndexError),
}

impl From<EmbedError> for BootstrapError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::DimensionMismatch { expected, actual } => {
                Self::Config(ConfigError::DimensionMismatch {
                    source_name: "embedding backend".into(),
                    expected,
                    actual,
                })
            }
            other => Self::Embedder(other),
        }
    }
}

impl From<VectorStoreError> for BootstrapError {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::DimensionMismatch { stored, requested } => {
                Self::Config(ConfigError::DimensionMismatch {
                    source_name: "existing vector collection".into(),
                    expected: requested,
                    actual: stored,
                })
            }
            other => Self::Store(other),
        }
    }
}

/// A ready agent plus the pipeline that keeps its index current.
pub struct Session {
    pub agent: AgentLoop<AnyProvider>,
    pipeline: IngestionPipeline,
    config: Config,
    root: PathBuf,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.root)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bring the index up to date with the workspace.
    ///
    /// With `index.skip_ingest`, an existing collection is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder or the store fails mid-pass.
    pub async fn ingest(&self) -> delver_index::Result<IngestReport> {
        self.pipeline.run(self.config.index.skip_ingest).await
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wire an agent from already-built backends.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid chunking settings.
    pub fn assemble(
        config: Config,
        root: PathBuf,
        provider: AnyProvider,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        manifest: IngestManifest,
    ) -> Result<Self, BootstrapError> {
        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_length: config.index.chunk_size,
            overlap: config.index.chunk_overlap,
        })?;
        let workspace = Workspace::new(root.clone())
            .with_extensions(config.index.extensions.iter().map(String::as_str))
            .with_ignore_dirs(config.index.ignore_dirs.iter().map(String::as_str))
            .with_max_file_size(config.index.max_file_size);

        let scope = manifest_scope(&config, store.name(), embedder.dimension(), &root);
        let pipeline = IngestionPipeline::new(
            workspace.clone(),
            chunker,
            Arc::clone(&embedder),
            Arc::clone(&store),
            manifest,
            scope,
        )
        .with_batch_size(config.index.embed_batch_size)
        .with_store_timeout(config.timeouts.store());

        let exact = ExactSearch::new(
            workspace.clone(),
            chunker,
            config.retrieval.context_lines,
            config.retrieval.max_exact_matches,
        );
        let retriever = HybridRetriever::new(
            exact,
            embedder,
            store,
            RetrievalConfig {
                max_results: config.retrieval.max_results,
                semantic_top_k: config.retrieval.semantic_top_k,
                store_timeout: config.timeouts.store(),
            },
        );

        let ctx = ToolContext {
            sandbox: Sandbox::new(&root),
            workspace,
            retriever: Arc::new(retriever),
            config: config.tools.clone(),
            command_timeout: config.timeouts.tool(),
        };
        let tools = ToolRegistry::with_builtin_tools(ctx);
        tracing::debug!(tools = ?tools.names(), "tool registry ready");

        let env = EnvironmentContext {
            workspace: root.display().to_string(),
            mode: config.mode.to_string(),
            model_name: model_name(&config).to_owned(),
        };
        let agent = AgentLoop::new(provider, tools, build_system_prompt(Some(&env)))
            .with_max_tool_iterations(config.agent.max_tool_iterations)
            .with_context_budget(config.agent.context_budget_tokens)
            .with_llm_timeout(config.timeouts.llm());

        Ok(Self {
            agent,
            pipeline,
            config,
            root,
        })
    }
}

/// Manifest key: a different backend, model or dimension means a
/// different index, even under the same collection name.
fn manifest_scope(config: &Config, store: &str, dimension: usize, root: &Path) -> String {
    format!(
        "{store}/{}/{}@{dimension}:{}",
        config.index.collection,
        embedding_model(config),
        root.display()
    )
}

fn embedding_model(config: &Config) -> &str {
    match config.mode {
        Mode::Local => &config.llm.embedding_model,
        Mode::Online => &config.llm.remote.embedding_model,
    }
}

fn model_name(config: &Config) -> &str {
    match config.mode {
        Mode::Local => &config.llm.model,
        Mode::Online => &config.llm.remote.model,
    }
}

/// LLM and embedding provider for the configured mode.
///
/// # Errors
///
/// Returns [`ConfigError::MissingCredential`] when online mode has no key.
pub fn build_provider(config: &Config) -> Result<AnyProvider, ConfigError> {
    match config.mode {
        Mode::Local => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.ollama_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        Mode::Online => {
            let key = config
                .secrets
                .llm_api_key
                .as_ref()
                .ok_or(ConfigError::MissingCredential {
                    what: "a remote LLM API key",
                    env: "DELVER_LLM_API_KEY",
                    mode: config.mode,
                })?;
            let remote = &config.llm.remote;
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                key.expose().to_owned(),
                remote.base_url.clone(),
                remote.model.clone(),
                remote.max_tokens,
                Some(remote.embedding_model.clone()),
            )))
        }
    }
}

async fn build_store(
    config: &Config,
    pool: SqlitePool,
) -> Result<Arc<dyn VectorStore>, BootstrapError> {
    let store: Arc<dyn VectorStore> = match config.mode {
        Mode::Local => Arc::new(LocalStore::new(pool, config.index.collection.clone())),
        Mode::Online => {
            let remote = &config.index.remote;
            Arc::new(QdrantStore::new(
                &remote.qdrant_url,
                config
                    .secrets
                    .qdrant_api_key
                    .as_ref()
                    .map(Secret::expose)
                    .map(str::to_owned),
                config.index.collection.clone(),
                config.timeouts.store(),
                remote.max_retries,
            )?)
        }
    };
    with_timeout(
        "ensure",
        config.timeouts.store(),
        store.ensure(config.index.dimension),
    )
    .await?;
    Ok(store)
}

/// Validate `config`, build the backends for its mode, and wire a session
/// over `root`.
///
/// # Errors
///
/// Returns [`BootstrapError`] for any configuration or backend problem; all
/// of them are fatal.
pub async fn bootstrap(config: Config, root: &Path) -> Result<Session, BootstrapError> {
    config.validate()?;
    let provider = build_provider(&config)?;
    bootstrap_with_provider(config, root, provider).await
}

/// [`bootstrap`] with a caller-supplied provider.
///
/// # Errors
///
/// See [`bootstrap`].
pub async fn bootstrap_with_provider(
    config: Config,
    root: &Path,
    provider: AnyProvider,
) -> Result<Session, BootstrapError> {
    config.validate()?;
    let root = root
        .canonicalize()
        .map_err(|source| BootstrapError::Workspace {
            path: root.to_path_buf(),
            source,
        })?;
    if !root.is_dir() {
        return Err(BootstrapError::Workspace {
            path: root,
            source: std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        });
    }

    let embedder =
        ProviderEmbedder::detect(provider.clone(), config.timeouts.embedding()).await?;
    delver_index::embedder::check_dimension(config.index.dimension, embedder.dimension())?;
    tracing::info!(
        mode = %config.mode,
        provider = embedder.name(),
        dimension = embedder.dimension(),
        "embedding backend ready"
    );

    let pool = open_index_db(&config.index.data_dir.join(INDEX_DB_FILE)).await?;
    let store = build_store(&config, pool.clone()).await?;
    tracing::info!(store = store.name(), collection = %config.index.collection, "vector store ready");

    Session::assemble(
        config,
        root,
        provider,
        Arc::new(embedder),
        store,
        IngestManifest::new(pool),
    )
}

#[cfg(test)]
mod tests {
    use delver_llm::mock::MockProvider;

    use super::*;

    fn local_config(data_dir: &Path, dimension: usize) -> Config {
        let mut config = Config::default();
        config.index.data_dir = data_dir.to_path_buf();
        config.index.dimension = dimension;
        config
    }

    fn mock(dimension: usize) -> AnyProvider {
        AnyProvider::Mock(MockProvider::default().with_dimension(dimension))
    }

    #[tokio::test]
    async fn local_session_over_workspace() {
        let ws = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("app.py"), "API_KEY = \"x\"\n").unwrap();

        let session = bootstrap_with_provider(local_config(data.path(), 16), ws.path(), mock(16))
            .await
            .unwrap();
        assert_eq!(session.root(), ws.path().canonicalize().unwrap());
        assert_eq!(session.agent.tools().names().len(), 8);

        let report = session.ingest().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(data.path().join(INDEX_DB_FILE).exists());
    }

    #[tokio::test]
    async fn embedder_dimension_mismatch_is_fatal() {
        let ws = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let err = bootstrap_with_provider(local_config(data.path(), 384), ws.path(), mock(16))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Config(ConfigError::DimensionMismatch {
                expected: 384,
                actual: 16,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn stored_collection_dimension_mismatch_is_fatal() {
        let ws = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        bootstrap_with_provider(local_config(data.path(), 16), ws.path(), mock(16))
            .await
            .unwrap();

        let err = bootstrap_with_provider(local_config(data.path(), 32), ws.path(), mock(32))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Config(ConfigError::DimensionMismatch {
                expected: 32,
                actual: 16,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unreachable_embedder_is_fatal() {
        let ws = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let provider = AnyProvider::Mock(MockProvider::default().failing_embeddings());
        let err = bootstrap_with_provider(local_config(data.path(), 384), ws.path(), provider)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Embedder(_)));
    }

    #[tokio::test]
    async fn missing_workspace_rejected() {
        let data = tempfile::tempdir().unwrap();
        let err = bootstrap_with_provider(
            local_config(data.path(), 16),
            &data.path().join("nope"),
            mock(16),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BootstrapError::Workspace { .. }));
    }

    #[tokio::test]
    async fn online_mode_without_keys_fails_before_any_backend() {
        let ws = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.mode = Mode::Online;
        let err = bootstrap(config, ws.path()).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Config(ConfigError::MissingCredential { .. })
        ));
    }

    #[test]
    fn manifest_scope_separates_backends_and_models() {
        let root = Path::new("/ws");
        let local = Config::default();
        let mut online = Config::default();
        online.mode = Mode::Online;

        let a = manifest_scope(&local, "local", 384, root);
        assert_eq!(a, "local/local_docs/all-minilm@384:/ws");
        assert_ne!(a, manifest_scope(&local, "qdrant", 384, root));
        assert_ne!(a, manifest_scope(&local, "local", 768, root));
        assert_ne!(a, manifest_scope(&online, "local", 384, root));
    }

    #[test]
    fn provider_follows_mode() {
        let config = Config::default();
        assert!(matches!(build_provider(&config), Ok(AnyProvider::Ollama(_))));

        let mut online = Config::default();
        online.mode = Mode::Online;
        online.secrets.llm_api_key = Some(Secret::new("sk-test"));
        assert!(matches!(build_provider(&online), Ok(AnyProvider::OpenAi(_))));
    }
}
