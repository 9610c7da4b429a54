use std::path::PathBuf;
use std::time::Duration;

use delver_index::workspace::{DEFAULT_EXTENSIONS, DEFAULT_IGNORE_DIRS, DEFAULT_MAX_FILE_SIZE};
use delver_tools::ToolsConfig;
use serde::Deserialize;

use crate::secret::Secret;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Backend selector: everything on this machine, or hosted LLM + Qdrant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Online,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Online => "online",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_embedding_model() -> String {
    "all-minilm".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub remote: RemoteLlmConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            remote: RemoteLlmConfig::default(),
        }
    }
}

fn default_remote_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_remote_model() -> String {
    "gpt-4o-mini".into()
}

fn default_remote_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_max_tokens() -> u32 {
    2048
}

/// OpenAI-compatible endpoint used in online mode. The key is never read
/// from this table.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteLlmConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
    #[serde(default = "default_remote_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RemoteLlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            model: default_remote_model(),
            embedding_model: default_remote_embedding_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".delver")
}

fn default_collection() -> String {
    "local_docs".into()
}

fn default_dimension() -> usize {
    384
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect()
}

fn default_ignore_dirs() -> Vec<String> {
    DEFAULT_IGNORE_DIRS.iter().map(|d| (*d).to_owned()).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Holds `index.db` (local vectors and the ingestion manifest).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    /// Skip the startup pass when the collection already exists.
    #[serde(default)]
    pub skip_ingest: bool,
    #[serde(default)]
    pub remote: RemoteIndexConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            collection: default_collection(),
            dimension: default_dimension(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            embed_batch_size: default_embed_batch_size(),
            extensions: default_extensions(),
            ignore_dirs: default_ignore_dirs(),
            skip_ingest: false,
            remote: RemoteIndexConfig::default(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_store_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIndexConfig {
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_store_retries")]
    pub max_retries: u32,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            max_retries: default_store_retries(),
        }
    }
}

fn default_max_results() -> usize {
    5
}

fn default_semantic_top_k() -> usize {
    10
}

fn default_context_lines() -> usize {
    2
}

fn default_max_exact_matches() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,
    /// Lines of context around each exact match in snippets.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_max_exact_matches")]
    pub max_exact_matches: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            semantic_top_k: default_semantic_top_k(),
            context_lines: default_context_lines(),
            max_exact_matches: default_max_exact_matches(),
        }
    }
}

fn default_max_tool_iterations() -> usize {
    10
}

fn default_context_budget_tokens() -> usize {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            context_budget_tokens: default_context_budget_tokens(),
        }
    }
}

fn default_llm_secs() -> u64 {
    120
}

fn default_embedding_secs() -> u64 {
    30
}

fn default_store_secs() -> u64 {
    10
}

fn default_tool_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,
    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,
    #[serde(default = "default_store_secs")]
    pub store_secs: u64,
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }

    #[must_use]
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    #[must_use]
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    #[must_use]
    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_secs: default_llm_secs(),
            embedding_secs: default_embedding_secs(),
            store_secs: default_store_secs(),
            tool_secs: default_tool_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs here instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Credentials resolved from the environment at load time.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub llm_api_key: Option<Secret>,
    pub qdrant_api_key: Option<Secret>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            llm: LlmConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalSettings::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
            secrets: ResolvedSecrets::default(),
        }
    }
}
