//! Scriptable provider for tests.

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{ChatResponse, LlmProvider, Message, ToolDefinition, ToolUseRequest};

/// One scripted reply to `chat_with_tools` (or `chat`).
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// `(tool name, arguments)` pairs; ids are assigned in order.
    Tools(Vec<(String, serde_json::Value)>),
    Malformed,
    Fail,
}

impl MockReply {
    #[must_use]
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_owned())
    }

    #[must_use]
    pub fn tool(name: &str, args: serde_json::Value) -> Self {
        Self::Tools(vec![(name.to_owned(), args)])
    }
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    /// Reply used once the script runs dry.
    pub default_reply: MockReply,
    pub dimension: usize,
    pub supports_embeddings: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before every chat reply.
    pub delay_ms: u64,
    /// Milliseconds to sleep before every embedding reply.
    pub embed_delay_ms: u64,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    call_seq: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: MockReply::text("mock response"),
            dimension: 384,
            supports_embeddings: true,
            fail_embed: false,
            delay_ms: 0,
            embed_delay_ms: 0,
            requests: Arc::new(Mutex::new(Vec::new())),
            call_seq: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_embed_delay(mut self, ms: u64) -> Self {
        self.embed_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    /// Every message list the provider has been asked to complete, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self, messages: &[Message]) -> MockReply {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone())
    }

    fn next_call_id(&self) -> String {
        let seq = self.call_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("mock_call_{seq}")
    }

    async fn pause(ms: u64) {
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }

    /// Bag-of-words hashing embedding: texts sharing words land close together.
    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension.max(1)];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let mut h = DefaultHasher::new();
            word.to_lowercase().hash(&mut h);
            let bucket = usize::try_from(h.finish() % v.len() as u64).unwrap_or(0);
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        Self::pause(self.delay_ms).await;
        match self.next_reply(messages) {
            MockReply::Text(s) => Ok(s),
            MockReply::Tools(calls) => Ok(format!("(wanted {} tool calls)", calls.len())),
            MockReply::Malformed => Ok(String::new()),
            MockReply::Fail => Err(LlmError::Other("mock LLM error".into())),
        }
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        Self::pause(self.delay_ms).await;
        match self.next_reply(messages) {
            MockReply::Text(s) => Ok(ChatResponse::Text(s)),
            MockReply::Tools(calls) => Ok(ChatResponse::ToolUse {
                text: None,
                tool_calls: calls
                    .into_iter()
                    .map(|(name, input)| ToolUseRequest {
                        id: self.next_call_id(),
                        name,
                        input,
                    })
                    .collect(),
            }),
            MockReply::Malformed => Err(LlmError::MalformedOutput(
                "mock malformed output".into(),
            )),
            MockReply::Fail => Err(LlmError::Other("mock LLM error".into())),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Self::pause(self.embed_delay_ms).await;
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        Ok(self.hash_embed(text))
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
