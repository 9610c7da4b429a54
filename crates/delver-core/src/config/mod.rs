mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Startup configuration problems. Always fatal; never raised mid-session.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{what} is required in {mode} mode; set {env}")]
    MissingCredential {
        what: &'static str,
        env: &'static str,
        mode: Mode,
    },

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("index dimension must be nonzero")]
    ZeroDimension,

    #[error(
        "embedding dimension mismatch: {source_name} has {actual}, configuration expects {expected}"
    )]
    DimensionMismatch {
        source_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    Invalid(String),
}

/// `explicit`, else `$DELVER_CONFIG`, else [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    std::env::var("DELVER_CONFIG").map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check settings that cannot be repaired later in the session.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.dimension == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if self.index.chunk_size == 0 || self.index.chunk_overlap >= self.index.chunk_size {
            return Err(ConfigError::InvalidChunking {
                size: self.index.chunk_size,
                overlap: self.index.chunk_overlap,
            });
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }
        if self.mode == Mode::Online {
            if self.secrets.llm_api_key.is_none() {
                return Err(ConfigError::MissingCredential {
                    what: "a remote LLM API key",
                    env: "DELVER_LLM_API_KEY",
                    mode: self.mode,
                });
            }
            if self.secrets.qdrant_api_key.is_none() {
                return Err(ConfigError::MissingCredential {
                    what: "a Qdrant API key",
                    env: "DELVER_QDRANT_API_KEY",
                    mode: self.mode,
                });
            }
        }
        Ok(())
    }
}
