//! Multi-provider HTTP completion client.
//!
//! Supports the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints such as Ollama, Together, and
//! vLLM).  Turns are streamed over SSE; compaction summaries use the plain
//! non-streaming endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::CompletionService;
use crate::llm::sse::decode_stream;
use crate::llm::streaming::AnthropicDecoder;
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{CompletionRequest, CompletionStream, SummaryRequest, ToolDefinition};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default maximum tokens per response.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Provider enum
// ---------------------------------------------------------------------------

/// Identifies which wire protocol the client should speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    #[default]
    Anthropic,
    /// OpenAI Chat Completions API (also covers OpenAI-compatible endpoints).
    #[serde(alias = "openai-compatible")]
    OpenAI,
}

impl LlmProvider {
    /// Lowercase provider name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }

    /// The public endpoint for this provider.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_BASE_URL,
            Self::OpenAI => OPENAI_BASE_URL,
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a single provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Which provider this configuration targets.
    pub provider: LlmProvider,
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API (e.g. `https://api.anthropic.com`).
    pub base_url: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl LlmClientConfig {
    /// Create a configuration for the Anthropic API.
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create a configuration for any OpenAI-compatible API.
    pub fn openai_compatible(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: api_key.into(),
            base_url: base_url.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A [`CompletionService`] backed by an HTTP provider.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingApiKey`] when the key is empty.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: config.provider.as_str().into(),
            });
        }

        // No overall timeout: a streamed turn may legitimately run for minutes.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Returns the configured provider.
    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    // -- Request building ----------------------------------------------------

    /// Build the JSON body for the Anthropic Messages API.
    fn build_anthropic_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages_to_anthropic(&request.input),
        });

        if !request.instructions.is_empty() {
            body["system"] = json!(request.instructions);
        }
        if !request.tools.is_empty() {
            body["tools"] = tools_to_anthropic(&request.tools);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Build the JSON body for the OpenAI Chat Completions API.
    fn build_openai_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages_to_openai(&request.instructions, &request.input),
        });

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn build_summary_body(&self, request: &SummaryRequest) -> Value {
        match self.config.provider {
            LlmProvider::Anthropic => json!({
                "model": request.model,
                "max_tokens": self.config.max_tokens,
                "system": request.instructions,
                "messages": [{ "role": "user", "content": request.input }],
            }),
            LlmProvider::OpenAI => json!({
                "model": request.model,
                "max_tokens": self.config.max_tokens,
                "messages": [
                    { "role": "system", "content": request.instructions },
                    { "role": "user", "content": request.input },
                ],
            }),
        }
    }

    // -- Transport -----------------------------------------------------------

    /// POST `body` to the provider endpoint and fail on non-success status.
    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let (url, headers) = match self.config.provider {
            LlmProvider::Anthropic => (
                format!("{}/v1/messages", self.config.base_url),
                self.anthropic_headers()?,
            ),
            LlmProvider::OpenAI => (
                format!("{}/chat/completions", self.config.base_url),
                self.openai_headers()?,
            ),
        };

        tracing::debug!(
            url = %url,
            model = %body["model"],
            provider = self.config.provider.as_str(),
            "sending completion request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }
        Ok(resp)
    }

    fn anthropic_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                AgentError::LlmRequestFailed {
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn openai_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let stream = match self.config.provider {
            LlmProvider::Anthropic => {
                let resp = self.post(&self.build_anthropic_body(request, true)).await?;
                decode_stream(resp.bytes_stream(), AnthropicDecoder::new())
            }
            LlmProvider::OpenAI => {
                let resp = self.post(&self.build_openai_body(request, true)).await?;
                decode_stream(resp.bytes_stream(), OpenAiStreamAccumulator::new())
            }
        };
        Ok(stream)
    }

    async fn complete(&self, request: &SummaryRequest) -> Result<String> {
        let resp = self.post(&self.build_summary_body(request)).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        match self.config.provider {
            LlmProvider::Anthropic => parse_anthropic_text(&v),
            LlmProvider::OpenAI => parse_openai_text(&v),
        }
    }
}

// ===========================================================================
// Anthropic format conversion
// ===========================================================================

/// Convert the history to the Anthropic wire format.
///
/// Anthropic expects strictly alternating roles, so consecutive items that
/// map to the same role (assistant text followed by tool uses, tool results
/// followed by user text) are merged into one message with several content
/// blocks.
pub fn messages_to_anthropic(messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        let (role, block) = match msg {
            Message::UserText { text } => ("user", json!({ "type": "text", "text": text })),
            Message::AssistantText { text } => {
                ("assistant", json!({ "type": "text", "text": text }))
            }
            Message::ToolCall {
                id,
                name,
                arguments,
            } => (
                "assistant",
                json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments_object(arguments),
                }),
            ),
            Message::ToolResult { id, output, .. } => (
                "user",
                json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": output,
                }),
            ),
        };

        if let Some(last) = wire.last_mut()
            && last["role"] == role
            && let Some(blocks) = last["content"].as_array_mut()
        {
            blocks.push(block);
            continue;
        }
        wire.push(json!({ "role": role, "content": [block] }));
    }

    wire
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    json!(tool_values)
}

/// Extract the concatenated text blocks of a non-streaming response.
fn parse_anthropic_text(v: &Value) -> Result<String> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| AgentError::LlmParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    Ok(content
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect())
}

/// Tool-use input must be a JSON object on the wire.  Arguments the model
/// produced that do not parse as one are sent as an empty object; the
/// dispatcher has already reported the problem in the tool result.
fn arguments_object(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Default::default()),
    }
}

// ===========================================================================
// OpenAI format conversion
// ===========================================================================

/// Convert the history to the OpenAI Chat Completions wire format.
///
/// Instructions become a leading `system` message.  Tool calls that directly
/// follow assistant text (or other tool calls) join that assistant message's
/// `tool_calls` array; tool results use `role: "tool"`.
pub fn messages_to_openai(instructions: &str, messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);

    if !instructions.is_empty() {
        wire.push(json!({ "role": "system", "content": instructions }));
    }

    for msg in messages {
        match msg {
            Message::UserText { text } => {
                wire.push(json!({ "role": "user", "content": text }));
            }
            Message::AssistantText { text } => {
                wire.push(json!({ "role": "assistant", "content": text }));
            }
            Message::ToolCall {
                id,
                name,
                arguments,
            } => {
                let call = json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                });

                if let Some(last) = wire.last_mut()
                    && last["role"] == "assistant"
                {
                    match last["tool_calls"].as_array_mut() {
                        Some(calls) => calls.push(call),
                        None => last["tool_calls"] = json!([call]),
                    }
                    continue;
                }
                wire.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": [call],
                }));
            }
            Message::ToolResult { id, output, .. } => {
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": output,
                }));
            }
        }
    }

    wire
}

/// Convert tool definitions into the OpenAI Chat Completions API format.
///
/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Extract the assistant text of a non-streaming response.
fn parse_openai_text(v: &Value) -> Result<String> {
    let message = &v["choices"][0]["message"];

    if message.is_null() {
        return Err(AgentError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    Ok(message["content"].as_str().unwrap_or_default().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
