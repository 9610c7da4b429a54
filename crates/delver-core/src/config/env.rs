use std::path::PathBuf;

use super::{Config, Mode};
use crate::secret::Secret;

/// First non-empty value among `keys`, in order.
fn first_var(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_core();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_core(&mut self) {
        if let Ok(v) = std::env::var("DELVER_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "local" => self.mode = Mode::Local,
                "online" => self.mode = Mode::Online,
                _ => tracing::warn!("ignoring invalid DELVER_MODE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("DELVER_OLLAMA_URL") {
            self.llm.ollama_url = v;
        }
        if let Ok(v) = std::env::var("DELVER_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DELVER_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("DELVER_REMOTE_BASE_URL") {
            self.llm.remote.base_url = v;
        }
        if let Ok(v) = std::env::var("DELVER_REMOTE_MODEL") {
            self.llm.remote.model = v;
        }
        if let Ok(v) = std::env::var("DELVER_DATA_DIR") {
            self.index.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DELVER_COLLECTION") {
            self.index.collection = v;
        }
        if let Ok(v) = std::env::var("DELVER_QDRANT_URL") {
            self.index.remote.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("DELVER_EMBEDDING_DIMENSION")
            && let Ok(dim) = v.parse::<usize>()
        {
            self.index.dimension = dim;
        }
        if let Ok(v) = std::env::var("DELVER_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.chunk_size = n;
        }
        if let Ok(v) = std::env::var("DELVER_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("DELVER_MAX_RESULTS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.max_results = n;
        }
        if let Ok(v) = std::env::var("DELVER_MAX_TOOL_ITERATIONS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.agent.max_tool_iterations = n;
        }
        if let Ok(v) = std::env::var("DELVER_TIMEOUT_LLM")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.llm_secs = secs;
        }
        if let Ok(v) = std::env::var("DELVER_TIMEOUT_TOOL")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.tool_secs = secs;
        }
        if let Some(v) = first_var(&["DELVER_LOG_LEVEL", "LOG_LEVEL"]) {
            self.logging.level = v;
        }
        if let Some(v) = first_var(&["DELVER_LOG_FILE", "LOG_FILE"]) {
            self.logging.file = Some(PathBuf::from(v));
        }
    }

    fn apply_env_secrets(&mut self) {
        if let Some(v) = first_var(&["DELVER_LLM_API_KEY", "OPENAI_API_KEY"]) {
            self.secrets.llm_api_key = Some(Secret::new(v));
        }
        if let Some(v) = first_var(&["DELVER_QDRANT_API_KEY", "QDRANT_API_KEY"]) {
            self.secrets.qdrant_api_key = Some(Secret::new(v));
        }
    }
}
