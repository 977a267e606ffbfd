//! SSE stream decoder for the OpenAI Chat Completions API.
//!
//! The OpenAI streaming format sends `data:` lines with JSON payloads
//! containing `choices[].delta` objects and terminates with a `data: [DONE]`
//! sentinel.  Text deltas are forwarded immediately; tool calls arrive as
//! fragments keyed by `index` and are only emitted once the choice reports a
//! `finish_reason` (or the stream ends).

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::sse::SseDecoder;
use crate::llm::types::{CompletionEvent, ToolCallRequest, Usage};

/// Accumulates fragments from an OpenAI SSE stream.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    /// In-progress tool calls indexed by their position in the tool_calls
    /// array.  OpenAI sends `index` to correlate chunks.
    tool_call_builders: Vec<OpenAiToolCallBuilder>,

    /// Whether the `[DONE]` sentinel has been received.
    done: bool,
}

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    /// The tool call id (e.g. `"call_abc123"`).
    id: String,
    /// The function name.
    name: String,
    /// Accumulated function arguments JSON string.
    arguments: String,
}

impl OpenAiStreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain every buffered tool call, in index order.
    fn flush_tool_calls(&mut self) -> Vec<CompletionEvent> {
        self.tool_call_builders
            .drain(..)
            .filter(|b| !b.name.is_empty())
            .map(|b| {
                let arguments = if b.arguments.trim().is_empty() {
                    "{}".to_owned()
                } else {
                    b.arguments
                };
                CompletionEvent::ToolCall(ToolCallRequest {
                    id: b.id,
                    name: b.name,
                    arguments,
                })
            })
            .collect()
    }
}

impl SseDecoder for OpenAiStreamAccumulator {
    fn feed_line(&mut self, line: &str) -> Result<Vec<CompletionEvent>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(Vec::new());
        }

        // `event:` lines and other SSE fields carry nothing for this format.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let v: Value = serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in OpenAI SSE data: {e}"),
        })?;

        if let Some(message) = v["error"]["message"].as_str() {
            return Err(AgentError::LlmStreamError {
                reason: message.to_owned(),
            });
        }

        let mut events = Vec::new();
        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        if let Some(content) = delta["content"].as_str()
            && !content.is_empty()
        {
            events.push(CompletionEvent::TextDelta(content.to_owned()));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;

                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders
                        .push(OpenAiToolCallBuilder::default());
                }

                let builder = &mut self.tool_call_builders[index];

                // The id is typically sent in the first chunk for each tool call.
                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }

                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        if choice["finish_reason"].as_str().is_some() {
            events.extend(self.flush_tool_calls());
        }

        // Sent in a final chunk with empty `choices` when
        // `stream_options.include_usage` is set.
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            events.push(CompletionEvent::Usage(Usage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            }));
        }

        Ok(events)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) -> Result<Vec<CompletionEvent>> {
        Ok(self.flush_tool_calls())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
