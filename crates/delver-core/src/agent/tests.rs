use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use delver_index::chunker::{Chunker, ChunkerConfig};
use delver_index::db::open_index_db;
use delver_index::embedder::ProviderEmbedder;
use delver_index::exact::ExactSearch;
use delver_index::local_store::LocalStore;
use delver_index::retriever::{HybridRetriever, RetrievalConfig};
use delver_index::vector_store::VectorStore;
use delver_index::workspace::Workspace;
use delver_llm::MessagePart;
use delver_llm::mock::{MockProvider, MockReply};
use delver_tools::sandbox::Sandbox;
use delver_tools::{ToolContext, ToolsConfig};
use serde_json::json;

use super::*;
use crate::memory::TurnRole;

const DIM: usize = 16;

async fn registry(root: &Path) -> ToolRegistry {
    let sandbox = Sandbox::new(root);
    let workspace = Workspace::new(sandbox.root());
    let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
    let pool = open_index_db(Path::new(":memory:")).await.unwrap();
    let store = LocalStore::new(pool, "agent-test");
    store.ensure(DIM).await.unwrap();
    let embedder = ProviderEmbedder::new(
        MockProvider::default().with_dimension(DIM),
        DIM,
        Duration::from_secs(5),
    );
    let retriever = HybridRetriever::new(
        ExactSearch::new(workspace.clone(), chunker, 1, 20),
        Arc::new(embedder),
        Arc::new(store),
        RetrievalConfig::default(),
    );
    ToolRegistry::with_builtin_tools(ToolContext {
        sandbox,
        workspace,
        retriever: Arc::new(retriever),
        config: ToolsConfig::default(),
        command_timeout: Duration::from_secs(10),
    })
}

async fn agent(root: &Path, mock: MockProvider) -> AgentLoop<MockProvider> {
    AgentLoop::new(mock, registry(root).await, "You answer questions about code.")
        .with_max_tool_iterations(3)
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/config.py"),
        "import os\n\nAPI_KEY = \"x\"\n\ndef load():\n    return API_KEY\n",
    )
    .unwrap();
    dir
}

fn roles(agent: &AgentLoop<MockProvider>) -> Vec<TurnRole> {
    agent.memory().turns().iter().map(|t| t.role).collect()
}

#[tokio::test]
async fn plain_answer_without_tools() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::with_replies(vec![MockReply::text("Hi.")])).await;

    let reply = agent.handle("hello", &CancellationToken::new()).await.unwrap();
    assert_eq!(reply.text, "Hi.");
    assert!(!reply.incomplete);
    assert_eq!(reply.iterations, 0);
    assert_eq!(agent.state(), LoopState::Idle);
    assert_eq!(roles(&agent), vec![TurnRole::User, TurnRole::Agent]);
}

#[tokio::test]
async fn tool_call_then_answer() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("exact_search", json!({"pattern": "API_KEY"})),
        MockReply::text("API_KEY is defined in src/config.py:3."),
    ]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent
        .handle("where is API_KEY used", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reply.text, "API_KEY is defined in src/config.py:3.");
    assert_eq!(reply.tools_used, vec!["exact_search".to_owned()]);
    assert_eq!(reply.iterations, 1);
    assert_eq!(
        roles(&agent),
        vec![TurnRole::User, TurnRole::Agent, TurnRole::Tool, TurnRole::Agent]
    );

    let tool_turn = &agent.memory().turns()[2];
    assert_eq!(tool_turn.call_id.as_deref(), Some("mock_call_1"));
    assert!(tool_turn.content.contains("src/config.py:3"));
    assert!(tool_turn.result.as_ref().is_some_and(|r| r.success));

    let requests = agent.provider().requests();
    assert_eq!(requests.len(), 2);
    let observed = requests[1].iter().any(|m| {
        m.parts.iter().any(|p| {
            matches!(p, MessagePart::ToolResult { tool_use_id, content, .. }
                if tool_use_id == "mock_call_1" && content.contains("API_KEY"))
        })
    });
    assert!(observed);
}

#[tokio::test]
async fn loop_terminates_when_model_always_wants_tools() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("list_files", json!({})),
        MockReply::tool("list_files", json!({})),
        MockReply::tool("list_files", json!({})),
        MockReply::text("Partial: the project has src/config.py."),
    ])
    .with_default(MockReply::tool("list_files", json!({})));
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("explain everything", &CancellationToken::new()).await.unwrap();
    assert!(reply.incomplete);
    assert_eq!(reply.iterations, 3);
    assert_eq!(reply.text, "Partial: the project has src/config.py.");
    assert_eq!(agent.state(), LoopState::Idle);

    let last = agent.memory().last().unwrap();
    assert_eq!(last.role, TurnRole::Agent);
    assert!(last.flags.incomplete);

    let final_request = agent.provider().requests().pop().unwrap();
    assert_eq!(final_request.last().unwrap().content, BUDGET_EXHAUSTED_NOTE);
}

#[tokio::test]
async fn exhausted_budget_synthesizes_when_final_call_fails() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("list_files", json!({})),
        MockReply::tool("list_files", json!({})),
        MockReply::tool("list_files", json!({})),
        MockReply::Fail,
    ]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("list it", &CancellationToken::new()).await.unwrap();
    assert!(reply.incomplete);
    assert!(reply.text.starts_with("I reached the tool-call limit"));
    assert!(reply.text.contains("src/config.py"));
}

#[tokio::test]
async fn malformed_output_retried_once() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![MockReply::Malformed, MockReply::text("Recovered.")]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("q", &CancellationToken::new()).await.unwrap();
    assert_eq!(reply.text, "Recovered.");
    assert!(!reply.incomplete);

    let requests = agent.provider().requests();
    assert_eq!(requests[1].last().unwrap().content, CORRECTIVE_NOTE);
    // the note is not part of the transcript
    assert_eq!(agent.memory().len(), 2);
}

#[tokio::test]
async fn repeated_malformed_output_ends_with_apology() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![MockReply::Malformed, MockReply::text("  ")]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("q", &CancellationToken::new()).await.unwrap();
    assert!(reply.text.starts_with("Sorry"));
    assert!(reply.incomplete);
    assert_eq!(agent.state(), LoopState::Idle);
}

#[tokio::test]
async fn unknown_tool_becomes_error_observation() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("delete_everything", json!({})),
        MockReply::text("I cannot do that."),
    ]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("wipe it", &CancellationToken::new()).await.unwrap();
    assert_eq!(reply.text, "I cannot do that.");
    let tool_turn = &agent.memory().turns()[2];
    assert!(tool_turn.flags.error);
    assert_eq!(tool_turn.content, "[error] unknown tool: delete_everything");
}

#[tokio::test]
async fn invalid_arguments_become_error_observation() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("read_file", json!({"file": "config.py"})),
        MockReply::text("Retrying failed."),
    ]);
    let mut agent = agent(ws.path(), mock).await;

    agent.handle("read config", &CancellationToken::new()).await.unwrap();
    let tool_turn = &agent.memory().turns()[2];
    assert!(tool_turn.flags.error);
    assert!(tool_turn.content.contains("invalid arguments for read_file"));
}

#[tokio::test]
async fn several_calls_in_one_reply_all_answered() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::Tools(vec![
            ("list_files".into(), json!({})),
            ("read_file".into(), json!({"path": "config.py"})),
        ]),
        MockReply::text("Done."),
    ]);
    let mut agent = agent(ws.path(), mock).await;

    let reply = agent.handle("read the config", &CancellationToken::new()).await.unwrap();
    assert_eq!(reply.tools_used, vec!["list_files".to_owned(), "read_file".to_owned()]);
    let turns = agent.memory().turns();
    assert_eq!(turns[1].tool_calls.len(), 2);
    assert_eq!(turns[2].call_id.as_deref(), Some("mock_call_1"));
    assert_eq!(turns[3].call_id.as_deref(), Some("mock_call_2"));
    assert!(turns[3].content.contains("API_KEY = \"x\""));
}

#[tokio::test]
async fn cancellation_before_start_leaves_marker() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let reply = agent.handle("q", &cancel).await.unwrap();
    assert!(reply.cancelled);
    assert_eq!(agent.state(), LoopState::Idle);
    let marker = agent.memory().last().unwrap();
    assert_eq!(marker.content, CANCELLED_MARKER);
    assert!(marker.flags.cancelled);
    assert!(agent.provider().requests().is_empty());
}

#[tokio::test]
async fn cancellation_while_thinking() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::default().with_delay(10_000)).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let reply = agent.handle("slow question", &cancel).await.unwrap();
    assert!(reply.cancelled);
    assert_eq!(roles(&agent), vec![TurnRole::User, TurnRole::Agent]);
    assert_eq!(agent.state(), LoopState::Idle);
}

#[tokio::test]
async fn llm_timeout_is_typed_error() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::default().with_delay(5_000))
        .await
        .with_llm_timeout(Duration::from_millis(100));

    let err = agent.handle("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::LlmTimeout { .. }));
    assert_eq!(agent.state(), LoopState::Idle);
}

#[tokio::test]
async fn llm_outage_is_typed_error() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::with_replies(vec![MockReply::Fail])).await;
    let err = agent.handle("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));
    assert_eq!(agent.state(), LoopState::Idle);
}

#[tokio::test]
async fn follow_up_sees_previous_turn() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::text("load() and the API_KEY constant."),
        MockReply::text("They live in src/config.py."),
    ]);
    let mut agent = agent(ws.path(), mock).await;
    let cancel = CancellationToken::new();

    agent.handle("What does config.py define?", &cancel).await.unwrap();
    agent.handle("Where are they?", &cancel).await.unwrap();

    let second = &agent.provider().requests()[1];
    let contents: Vec<&str> = second.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"What does config.py define?"));
    assert!(contents.contains(&"load() and the API_KEY constant."));
    assert_eq!(*contents.last().unwrap(), "Where are they?");
}

#[tokio::test]
async fn closed_session_rejects_input() {
    let ws = workspace();
    let mut agent = agent(ws.path(), MockProvider::default()).await;
    agent.shutdown();
    assert_eq!(agent.state(), LoopState::Done);
    let err = agent.handle("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::SessionClosed));
    assert!(agent.memory().is_empty());
}

#[tokio::test]
async fn transcript_round_trips_through_agent() {
    let ws = workspace();
    let mock = MockProvider::with_replies(vec![
        MockReply::tool("list_files", json!({})),
        MockReply::text("One file."),
    ]);
    let mut agent = agent(ws.path(), mock).await;
    agent.handle("what files", &CancellationToken::new()).await.unwrap();

    let json = agent.export_transcript().unwrap();
    let mut fresh = self::agent(ws.path(), MockProvider::default()).await;
    fresh.import_transcript(&json).unwrap();
    assert_eq!(fresh.memory().turns(), agent.memory().turns());
}
