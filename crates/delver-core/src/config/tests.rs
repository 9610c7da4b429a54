use std::io::Write;

use serial_test::serial;

use super::*;
use crate::secret::Secret;

const ENV_KEYS: [&str; 23] = [
    "DELVER_CONFIG",
    "DELVER_MODE",
    "DELVER_OLLAMA_URL",
    "DELVER_LLM_MODEL",
    "DELVER_EMBEDDING_MODEL",
    "DELVER_REMOTE_BASE_URL",
    "DELVER_REMOTE_MODEL",
    "DELVER_DATA_DIR",
    "DELVER_COLLECTION",
    "DELVER_QDRANT_URL",
    "DELVER_EMBEDDING_DIMENSION",
    "DELVER_CHUNK_SIZE",
    "DELVER_CHUNK_OVERLAP",
    "DELVER_MAX_RESULTS",
    "DELVER_MAX_TOOL_ITERATIONS",
    "DELVER_TIMEOUT_LLM",
    "DELVER_TIMEOUT_TOOL",
    "DELVER_LOG_LEVEL",
    "DELVER_LOG_FILE",
    "DELVER_LLM_API_KEY",
    "DELVER_QDRANT_API_KEY",
    "OPENAI_API_KEY",
    "QDRANT_API_KEY",
];

fn clear_env() {
    for key in ENV_KEYS.iter().chain(&["LOG_LEVEL", "LOG_FILE"]) {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("delver.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.mode, Mode::Local);
    assert_eq!(config.llm.ollama_url, "http://localhost:11434");
    assert_eq!(config.llm.model, "llama3.2");
    assert_eq!(config.llm.embedding_model, "all-minilm");
    assert_eq!(config.index.collection, "local_docs");
    assert_eq!(config.index.dimension, 384);
    assert_eq!(config.index.chunk_size, 1000);
    assert_eq!(config.index.chunk_overlap, 200);
    assert_eq!(config.retrieval.max_results, 5);
    assert_eq!(config.retrieval.max_exact_matches, 20);
    assert_eq!(config.agent.max_tool_iterations, 10);
    assert_eq!(config.tools.max_read_chars, 20_000);
    assert_eq!(config.tools.git_log_count, 3);
    assert!(config.index.extensions.iter().any(|e| e == "py"));
    assert!(config.index.ignore_dirs.iter().any(|d| d == "node_modules"));
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.llm.model, "llama3.2");
}

#[test]
#[serial]
fn parse_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
mode = "online"

[llm.remote]
base_url = "https://llm.example.com/v1"
model = "gemini-2.5-flash"
max_tokens = 4096

[index]
dimension = 768
chunk_size = 500
chunk_overlap = 50

[index.remote]
qdrant_url = "https://qdrant.example.com:6334"

[tools]
git_log_count = 7

[timeouts]
tool_secs = 5
"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.mode, Mode::Online);
    assert_eq!(config.llm.remote.model, "gemini-2.5-flash");
    assert_eq!(config.llm.remote.max_tokens, 4096);
    assert_eq!(config.llm.model, "llama3.2");
    assert_eq!(config.index.dimension, 768);
    assert_eq!(config.index.chunk_size, 500);
    assert_eq!(config.index.collection, "local_docs");
    assert_eq!(config.index.remote.qdrant_url, "https://qdrant.example.com:6334");
    assert_eq!(config.tools.git_log_count, 7);
    assert_eq!(config.tools.max_read_chars, 20_000);
    assert_eq!(config.timeouts.tool_secs, 5);
    assert_eq!(config.timeouts.llm_secs, 120);
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "mode = [unclosed");
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("DELVER_LLM_MODEL", "qwen2.5-coder");
        std::env::set_var("DELVER_MODE", "ONLINE");
        std::env::set_var("DELVER_EMBEDDING_DIMENSION", "1536");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.llm.model, "qwen2.5-coder");
    assert_eq!(config.mode, Mode::Online);
    assert_eq!(config.index.dimension, 1536);
}

#[test]
#[serial]
fn invalid_numeric_override_ignored() {
    clear_env();
    let mut config = Config::default();
    unsafe { std::env::set_var("DELVER_MAX_RESULTS", "many") };
    config.apply_env_overrides();
    clear_env();
    assert_eq!(config.retrieval.max_results, 5);
}

#[test]
#[serial]
fn original_log_variables_honoured() {
    clear_env();
    let mut config = Config::default();
    unsafe {
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("LOG_FILE", "delver.log");
    };
    config.apply_env_overrides();
    clear_env();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file.as_deref(), Some(std::path::Path::new("delver.log")));
}

#[test]
#[serial]
fn prefixed_log_level_wins() {
    clear_env();
    let mut config = Config::default();
    unsafe {
        std::env::set_var("DELVER_LOG_LEVEL", "warn");
        std::env::set_var("LOG_LEVEL", "debug");
    };
    config.apply_env_overrides();
    clear_env();
    assert_eq!(config.logging.level, "warn");
}

#[test]
#[serial]
fn api_keys_come_from_env() {
    clear_env();
    let mut config = Config::default();
    unsafe {
        std::env::set_var("OPENAI_API_KEY", "sk-fallback");
        std::env::set_var("DELVER_QDRANT_API_KEY", "qd-key");
    };
    config.apply_env_overrides();
    clear_env();
    assert_eq!(
        config.secrets.llm_api_key.as_ref().map(Secret::expose),
        Some("sk-fallback")
    );
    assert_eq!(
        config.secrets.qdrant_api_key.as_ref().map(Secret::expose),
        Some("qd-key")
    );
}

#[test]
#[serial]
fn config_path_resolution() {
    clear_env();
    assert_eq!(resolve_config_path(None), std::path::PathBuf::from(DEFAULT_CONFIG_PATH));
    unsafe { std::env::set_var("DELVER_CONFIG", "/etc/delver.toml") };
    assert_eq!(resolve_config_path(None), std::path::PathBuf::from("/etc/delver.toml"));
    assert_eq!(
        resolve_config_path(Some(std::path::Path::new("cli.toml"))),
        std::path::PathBuf::from("cli.toml")
    );
    clear_env();
}

#[test]
fn online_mode_requires_both_keys() {
    let mut config = Config::default();
    config.mode = Mode::Online;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingCredential {
            env: "DELVER_LLM_API_KEY",
            ..
        })
    ));

    config.secrets.llm_api_key = Some(Secret::new("sk"));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingCredential {
            env: "DELVER_QDRANT_API_KEY",
            ..
        })
    ));

    config.secrets.qdrant_api_key = Some(Secret::new("qd"));
    assert!(config.validate().is_ok());
}

#[test]
fn overlap_must_be_below_chunk_size() {
    let mut config = Config::default();
    config.index.chunk_overlap = config.index.chunk_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunking { .. })
    ));
}

#[test]
fn zero_dimension_rejected() {
    let mut config = Config::default();
    config.index.dimension = 0;
    assert!(matches!(config.validate(), Err(ConfigError::ZeroDimension)));
}

#[test]
fn missing_credential_message_names_variable() {
    let err = ConfigError::MissingCredential {
        what: "a Qdrant API key",
        env: "DELVER_QDRANT_API_KEY",
        mode: Mode::Online,
    };
    assert_eq!(
        err.to_string(),
        "a Qdrant API key is required in online mode; set DELVER_QDRANT_API_KEY"
    );
}
