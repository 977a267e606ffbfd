//! SSE stream decoder for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format.  [`SseParser`] turns those lines into typed
//! [`StreamEvent`] values; [`AnthropicDecoder`] folds the events into the
//! provider-agnostic [`CompletionEvent`]s the engine consumes.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::sse::SseDecoder;
use crate::llm::types::{CompletionEvent, ToolCallRequest, Usage};

// ---------------------------------------------------------------------------
// Wire events
// ---------------------------------------------------------------------------

/// Events emitted during SSE streaming from the Anthropic Messages API.
///
/// These map to the `event:` field in the SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream has started.  Input tokens are known at this point.
    MessageStart {
        message_id: String,
        model: String,
        input_tokens: u32,
    },

    /// A new content block has started (`"text"` or `"tool_use"`).
    ContentBlockStart {
        index: u32,
        content_type: String,
        /// For tool_use blocks: the tool call id.
        id: Option<String>,
        /// For tool_use blocks: the tool name.
        name: Option<String>,
    },

    /// An incremental delta within a content block.
    ContentBlockDelta { index: u32, delta: StreamDelta },

    /// A content block has finished streaming.
    ContentBlockStop { index: u32 },

    /// Message-level update carrying the stop reason and output usage.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },

    /// The stream has fully terminated.
    MessageStop,

    /// The service reported an error mid-stream.
    Error { message: String },

    /// A ping / keepalive event (no payload).
    Ping,
}

/// Incremental delta within a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text.
    TextDelta(String),

    /// A chunk of JSON for a tool-use input.
    InputJsonDelta(String),
}

// ---------------------------------------------------------------------------
// Line parser
// ---------------------------------------------------------------------------

/// Parses raw SSE lines from the Anthropic Messages API stream.
///
/// Keeps state across calls because one event spans an `event:` line and the
/// `data:` line that follows it.
#[derive(Debug, Default)]
pub struct SseParser {
    /// The most recently seen `event:` type.
    current_event_type: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None` for
    /// comment lines, blank lines, or the `event:` line itself.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamEvent>> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event_type = Some(event_type.trim().to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data:") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());

            return self.parse_event(&event_type, data.trim_start());
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }

    /// Parse a (event_type, data_json) pair into a [`StreamEvent`].
    fn parse_event(&self, event_type: &str, data: &str) -> Result<Option<StreamEvent>> {
        match event_type {
            "message_start" => {
                let v = parse_json(data)?;
                let message = &v["message"];
                Ok(Some(StreamEvent::MessageStart {
                    message_id: json_string(message, "id"),
                    model: json_string(message, "model"),
                    input_tokens: json_u32(&message["usage"], "input_tokens"),
                }))
            }

            "content_block_start" => {
                let v = parse_json(data)?;
                let block = &v["content_block"];
                Ok(Some(StreamEvent::ContentBlockStart {
                    index: json_u32(&v, "index"),
                    content_type: json_string(block, "type"),
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                }))
            }

            "content_block_delta" => {
                let v = parse_json(data)?;
                let delta_obj = &v["delta"];

                let delta = match delta_obj["type"].as_str().unwrap_or_default() {
                    "text_delta" => StreamDelta::TextDelta(json_string(delta_obj, "text")),
                    "input_json_delta" => {
                        StreamDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                    }
                    other => {
                        tracing::debug!(delta_type = other, "skipping unsupported delta type");
                        return Ok(None);
                    }
                };

                Ok(Some(StreamEvent::ContentBlockDelta {
                    index: json_u32(&v, "index"),
                    delta,
                }))
            }

            "content_block_stop" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::ContentBlockStop {
                    index: json_u32(&v, "index"),
                }))
            }

            "message_delta" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::MessageDelta {
                    stop_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                    output_tokens: json_u32(&v["usage"], "output_tokens"),
                }))
            }

            "message_stop" => Ok(Some(StreamEvent::MessageStop)),

            "error" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::Error {
                    message: json_string(&v["error"], "message"),
                }))
            }

            "ping" => Ok(Some(StreamEvent::Ping)),

            _ => {
                if data.trim() == "[DONE]" {
                    Ok(Some(StreamEvent::MessageStop))
                } else {
                    tracing::trace!(event_type, "ignoring unknown SSE event type");
                    Ok(None)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Folds Anthropic stream events into [`CompletionEvent`]s.
///
/// Text deltas are forwarded as they arrive.  A tool call is emitted once its
/// content block stops, because only then is its input JSON complete.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    parser: SseParser,
    /// In-progress tool-use blocks keyed by content block index.
    tool_blocks: BTreeMap<u32, ToolCallBuilder>,
    input_tokens: u32,
    done: bool,
}

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug)]
struct ToolCallBuilder {
    id: String,
    name: String,
    input_json: String,
}

impl ToolCallBuilder {
    fn build(self) -> ToolCallRequest {
        let arguments = if self.input_json.trim().is_empty() {
            "{}".to_owned()
        } else {
            self.input_json
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

impl AnthropicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, event: StreamEvent) -> Result<Vec<CompletionEvent>> {
        let mut out = Vec::new();
        match event {
            StreamEvent::MessageStart { input_tokens, .. } => {
                self.input_tokens = input_tokens;
            }

            StreamEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } => {
                if content_type == "tool_use" {
                    self.tool_blocks.insert(
                        index,
                        ToolCallBuilder {
                            id: id.unwrap_or_default(),
                            name: name.unwrap_or_default(),
                            input_json: String::new(),
                        },
                    );
                }
            }

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                StreamDelta::TextDelta(t) => {
                    if !t.is_empty() {
                        out.push(CompletionEvent::TextDelta(t));
                    }
                }
                StreamDelta::InputJsonDelta(j) => {
                    if let Some(builder) = self.tool_blocks.get_mut(&index) {
                        builder.input_json.push_str(&j);
                    }
                }
            },

            StreamEvent::ContentBlockStop { index } => {
                if let Some(builder) = self.tool_blocks.remove(&index) {
                    out.push(CompletionEvent::ToolCall(builder.build()));
                }
            }

            StreamEvent::MessageDelta { output_tokens, .. } => {
                out.push(CompletionEvent::Usage(Usage {
                    input_tokens: self.input_tokens,
                    output_tokens,
                }));
            }

            StreamEvent::MessageStop => self.done = true,

            StreamEvent::Error { message } => {
                return Err(AgentError::LlmStreamError { reason: message });
            }

            StreamEvent::Ping => {}
        }
        Ok(out)
    }
}

impl SseDecoder for AnthropicDecoder {
    fn feed_line(&mut self, line: &str) -> Result<Vec<CompletionEvent>> {
        match self.parser.parse_line(line)? {
            Some(event) => self.apply(event),
            None => Ok(Vec::new()),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) -> Result<Vec<CompletionEvent>> {
        if let Some(builder) = self.tool_blocks.values().next() {
            return Err(AgentError::LlmStreamError {
                reason: format!("stream ended inside tool call `{}`", builder.name),
            });
        }
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a JSON string, mapping errors to [`AgentError::LlmParseFailed`].
fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

/// Extract a string field, returning an empty string if missing.
fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

fn json_u32(v: &Value, field: &str) -> u32 {
    v[field].as_u64().unwrap_or(0) as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
