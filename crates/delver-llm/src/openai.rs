use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, LlmProvider, Message, MessagePart, Role, ToolDefinition, ToolUseRequest,
};
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;

/// Remote hosted model behind an OpenAI-compatible `/chat/completions` API.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: String,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            max_tokens,
            embedding_model,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, LlmError> {
        let url = format!("{}/{path}", self.base_url);
        let response = send_with_retry("openai", MAX_RETRIES, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_server_error() {
            tracing::warn!(%status, "remote model unavailable");
            return Err(LlmError::Unavailable);
        }
        if !status.is_success() {
            tracing::error!("OpenAI-compatible API error {status}: {text}");
            return Err(LlmError::Other(format!(
                "remote request failed (status {status})"
            )));
        }
        Ok(text)
    }

    async fn embed_many(&self, input: Vec<&str>) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(LlmError::EmbedUnsupported { provider: "openai" })?;
        let expected = input.len();
        let body = EmbeddingRequest { input, model };
        let text = self.post_json("embeddings", &body).await?;
        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;
        resp.data.sort_by_key(|d| d.index);
        if resp.data.len() != expected {
            return Err(LlmError::Other(format!(
                "remote returned {} embeddings for {expected} inputs",
                resp.data.len()
            )));
        }
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let api_messages = convert_messages(messages)?;
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            tools: None,
        };
        let text = self.post_json("chat/completions", &body).await?;
        let resp: ChatCompletion = serde_json::from_str(&text)?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let api_messages = convert_messages(messages)?;
        let api_tools: Vec<ApiTool> = tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function",
                function: ApiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            tools: (!api_tools.is_empty()).then_some(api_tools.as_slice()),
        };

        let text = self.post_json("chat/completions", &body).await?;
        let resp: ChatCompletion = serde_json::from_str(&text)?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "openai" })?;
        parse_choice(choice.message)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_many(vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_many(texts.iter().map(String::as_str).collect())
            .await
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

fn parse_choice(message: ApiResponseMessage) -> Result<ChatResponse, LlmError> {
    let content = message.content.unwrap_or_default();
    let calls = message.tool_calls.unwrap_or_default();

    if calls.is_empty() {
        if content.trim().is_empty() {
            return Err(LlmError::MalformedOutput("empty reply".into()));
        }
        return Ok(ChatResponse::Text(content));
    }

    let tool_calls = calls
        .into_iter()
        .map(|tc| {
            let input: serde_json::Value = if tc.function.arguments.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&tc.function.arguments).map_err(|e| {
                    LlmError::MalformedOutput(format!(
                        "arguments for {} are not valid JSON: {e}",
                        tc.function.name
                    ))
                })?
            };
            Ok(ToolUseRequest {
                id: tc.id,
                name: tc.function.name,
                input,
            })
        })
        .collect::<Result<Vec<_>, LlmError>>()?;

    Ok(ChatResponse::ToolUse {
        text: (!content.is_empty()).then_some(content),
        tool_calls,
    })
}

fn convert_messages(messages: &[Message]) -> Result<Vec<ApiMessage>, LlmError> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        if !msg.has_tool_parts() {
            out.push(ApiMessage::plain(role_str(msg.role), msg.to_llm_content()));
            continue;
        }
        if msg.role == Role::Assistant {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for part in &msg.parts {
                match part {
                    MessagePart::Text { text: t } => text.push_str(t),
                    MessagePart::ToolUse { id, name, input } => tool_calls.push(ApiToolCallOut {
                        id: id.clone(),
                        r#type: "function",
                        function: ApiFunctionCall {
                            name: name.clone(),
                            arguments: serde_json::to_string(input)?,
                        },
                    }),
                    MessagePart::ToolResult { .. } => {}
                }
            }
            out.push(ApiMessage {
                role: "assistant",
                content: text,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
            });
        } else {
            for part in &msg.parts {
                match part {
                    MessagePart::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => out.push(ApiMessage {
                        role: "tool",
                        content: content.clone(),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id.clone()),
                    }),
                    MessagePart::Text { text } if !text.is_empty() => {
                        out.push(ApiMessage::plain("user", text));
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(out)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ApiTool<'a>]>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: content.to_owned(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize)]
struct ApiTool<'a> {
    r#type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ApiToolCallOut {
    id: String,
    r#type: &'static str,
    function: ApiFunctionCall,
}

#[derive(Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiToolCallFunction,
}

#[derive(Deserialize)]
struct ApiToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
