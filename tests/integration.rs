use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use delver_core::Config;
use delver_core::bootstrap::Session;
use delver_index::db::open_index_db;
use delver_index::embedder::{BoxFuture, ProviderEmbedder};
use delver_index::local_store::LocalStore;
use delver_index::manifest::IngestManifest;
use delver_index::types::{RecordFilter, ScoredRecord, SourceKind, VectorRecord};
use delver_index::vector_store::{VectorStore, VectorStoreError};
use delver_llm::mock::{MockProvider, MockReply};
use delver_llm::{AnyProvider, Message};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const DIM: usize = 16;

fn config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.index.data_dir = data_dir.to_path_buf();
    config.index.dimension = DIM;
    config
}

fn embedder() -> Arc<ProviderEmbedder<MockProvider>> {
    Arc::new(ProviderEmbedder::new(
        MockProvider::default().with_dimension(DIM),
        DIM,
        Duration::from_secs(5),
    ))
}

async fn local_store(collection: &str) -> (Arc<LocalStore>, IngestManifest) {
    let pool = open_index_db(Path::new(":memory:")).await.unwrap();
    let store = Arc::new(LocalStore::new(pool.clone(), collection));
    store.ensure(DIM).await.unwrap();
    (store, IngestManifest::new(pool))
}

fn session(
    root: &Path,
    config: Config,
    provider: MockProvider,
    store: Arc<dyn VectorStore>,
    manifest: IngestManifest,
) -> Session {
    Session::assemble(
        config,
        root.canonicalize().unwrap(),
        AnyProvider::Mock(provider),
        embedder(),
        store,
        manifest,
    )
    .unwrap()
}

fn mock_requests(session: &Session) -> Vec<Vec<Message>> {
    let AnyProvider::Mock(mock) = session.agent.provider() else {
        panic!("session is not using the mock provider");
    };
    mock.requests()
}

#[tokio::test]
async fn reingest_of_unchanged_workspace_adds_nothing() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let long: String = (1..=50)
        .map(|i| format!("def handler_{i}(request):\n    return request.value + {i}\n"))
        .collect();
    std::fs::write(ws.path().join("long.py"), long).unwrap();
    std::fs::write(ws.path().join("short.py"), "A = 1\nB = 2\nC = A + B\n").unwrap();

    let (store, manifest) = local_store("ingest-it").await;
    let session = session(
        ws.path(),
        config(data.path()),
        MockProvider::default(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        manifest,
    );

    let first = session.ingest().await.unwrap();
    assert_eq!(first.files_scanned, 2);
    assert_eq!(first.files_indexed, 2);
    assert!(first.errors.is_empty());
    let count = store.count().await.unwrap();
    assert!(count >= 2, "each file yields at least one chunk, got {count}");
    assert_eq!(first.chunks_written, count);

    let second = session.ingest().await.unwrap();
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.chunks_written, 0);
    assert_eq!(store.count().await.unwrap(), count);
}

#[tokio::test]
async fn edited_file_replaces_its_chunks() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let file = ws.path().join("notes.md");
    std::fs::write(&file, "# Notes\n\nfirst draft\n").unwrap();

    let (store, manifest) = local_store("edit-it").await;
    let session = session(
        ws.path(),
        config(data.path()),
        MockProvider::default(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        manifest,
    );
    session.ingest().await.unwrap();
    let before = store.count().await.unwrap();

    std::fs::write(&file, "# Notes\n\nsecond draft\n").unwrap();
    let report = session.ingest().await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(store.count().await.unwrap(), before);

    std::fs::remove_file(&file).unwrap();
    let report = session.ingest().await.unwrap();
    assert_eq!(report.records_removed, before);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn identifier_question_ranks_exact_hit_first() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::create_dir(ws.path().join("src")).unwrap();
    std::fs::write(
        ws.path().join("src/config.py"),
        "import os\n\nAPI_KEY = \"x\"\n",
    )
    .unwrap();
    std::fs::write(
        ws.path().join("README.md"),
        "# Service\n\nConfiguration lives in src.\n",
    )
    .unwrap();

    let (store, manifest) = local_store("retrieval-it").await;
    let provider = MockProvider::with_replies(vec![
        MockReply::tool("search_code", json!({"query": "where is API_KEY used"})),
        MockReply::text("API_KEY is defined in src/config.py:3."),
    ]);
    let mut session = session(ws.path(), config(data.path()), provider, store, manifest);
    session.ingest().await.unwrap();

    let reply = session
        .agent
        .handle("where is API_KEY used", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reply.tools_used, vec!["search_code"]);
    assert!(!reply.degraded);

    let requests = mock_requests(&session);
    let observation = requests[1]
        .iter()
        .flat_map(|m| &m.parts)
        .find_map(|p| match p {
            delver_llm::MessagePart::ToolResult { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    let first = observation
        .lines()
        .find(|l| l.starts_with("--- [1]"))
        .unwrap();
    assert!(first.contains("src/config.py:3"), "{first}");
    assert!(first.contains(&SourceKind::Exact.to_string()), "{first}");
}

#[tokio::test]
async fn follow_up_question_sees_previous_turn() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(ws.path().join("main.rs"), "fn main() {}\n").unwrap();

    let (store, manifest) = local_store("memory-it").await;
    let provider = MockProvider::with_replies(vec![
        MockReply::text("The entry point is main.rs."),
        MockReply::text("It does nothing yet."),
    ]);
    let mut session = session(ws.path(), config(data.path()), provider, store, manifest);
    let cancel = CancellationToken::new();

    session
        .agent
        .handle("Where is the entry point?", &cancel)
        .await
        .unwrap();
    let reply = session
        .agent
        .handle("What does it do?", &cancel)
        .await
        .unwrap();
    assert_eq!(reply.text, "It does nothing yet.");

    let requests = mock_requests(&session);
    assert_eq!(requests.len(), 2);
    let second: Vec<&str> = requests[1].iter().map(|m| m.content.as_str()).collect();
    assert!(second.contains(&"Where is the entry point?"));
    assert!(second.contains(&"The entry point is main.rs."));
    assert_eq!(second.last(), Some(&"What does it do?"));
}

#[tokio::test]
async fn question_stays_in_view_after_large_file_reads() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(ws.path().join("a.py"), "x = 1\n".repeat(3000)).unwrap();
    std::fs::write(ws.path().join("b.py"), "y = 2\n".repeat(3000)).unwrap();

    let (store, manifest) = local_store("budget-it").await;
    let provider = MockProvider::with_replies(vec![
        MockReply::tool("read_file", json!({"path": "a.py"})),
        MockReply::tool("read_file", json!({"path": "b.py"})),
        MockReply::text("a.py sets x, b.py sets y."),
    ]);
    let mut config = config(data.path());
    config.agent.context_budget_tokens = 2000;
    let mut session = session(ws.path(), config, provider, store, manifest);

    let question = "How do a.py and b.py differ?";
    let reply = session
        .agent
        .handle(question, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reply.text, "a.py sets x, b.py sets y.");

    let requests = mock_requests(&session);
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert!(request.iter().any(|m| m.content == question));
    }
}

/// Local store whose similarity queries never finish.
struct StalledStore {
    inner: LocalStore,
}

impl VectorStore for StalledStore {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn ensure(&self, dimension: usize) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        self.inner.ensure(dimension)
    }

    fn exists(&self) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        self.inner.exists()
    }

    fn upsert(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        self.inner.upsert(records)
    }

    fn query(
        &self,
        _vector: Vec<f32>,
        _top_k: usize,
        _filter: Option<RecordFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        self.inner.delete(ids)
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        self.inner.count()
    }
}

#[tokio::test]
async fn stalled_vector_store_degrades_to_exact_matches() {
    let ws = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(ws.path().join("settings.py"), "API_KEY = \"x\"\n").unwrap();

    let pool = open_index_db(Path::new(":memory:")).await.unwrap();
    let store = StalledStore {
        inner: LocalStore::new(pool.clone(), "stalled-it"),
    };
    store.ensure(DIM).await.unwrap();

    let mut config = config(data.path());
    config.timeouts.store_secs = 1;
    let provider = MockProvider::with_replies(vec![
        MockReply::tool("search_code", json!({"query": "where is API_KEY used"})),
        MockReply::text("API_KEY is set in settings.py:1."),
    ]);
    let mut session = session(
        ws.path(),
        config,
        provider,
        Arc::new(store),
        IngestManifest::new(pool),
    );

    let started = std::time::Instant::now();
    let reply = session
        .agent
        .handle("where is API_KEY used", &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(reply.text, "API_KEY is set in settings.py:1.");
    assert!(reply.degraded);
    assert!(!reply.incomplete);

    let last = session.agent.memory().last().unwrap();
    assert!(last.flags.degraded);
    let observation = &session.agent.memory().turns()[2].content;
    assert!(observation.starts_with("[degraded]"), "{observation}");
    assert!(observation.contains("settings.py:1"), "{observation}");
}

#[test]
fn shipped_default_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = Config::load(&path).unwrap();
    assert_eq!(config.index.dimension, 384);
    assert_eq!(config.agent.max_tool_iterations, 10);
    assert_eq!(config.retrieval.max_results, 5);
}
