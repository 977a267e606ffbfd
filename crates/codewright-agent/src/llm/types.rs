//! Core types for completion-service interaction.
//!
//! These types are provider-agnostic; the [`super::client`] module translates
//! them into provider-specific wire formats.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A streaming request for the next assistant turn.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// The model identifier.
    pub model: String,

    /// System instructions sent alongside the history.
    pub instructions: String,

    /// The entire conversation history, in order.
    pub input: Vec<Message>,

    /// Tool definitions the model may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A non-streaming, tool-free request that returns plain text.  Used for
/// compaction summaries.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub model: String,
    pub instructions: String,
    pub input: String,
}

/// A tool definition exposed to the model so it knows what tools exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// A fully assembled tool call as reported by the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    /// Identifier used to correlate the result.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Raw JSON argument text.
    pub arguments: String,
}

/// One event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// An incremental chunk of assistant text.
    TextDelta(String),

    /// A tool call whose arguments have been received in full.
    ToolCall(ToolCallRequest),

    /// Token accounting reported by the service.
    Usage(Usage),
}

/// The stream returned by [`super::CompletionService::stream`].
///
/// Ends with `None` on normal completion; an `Err` item means the stream is
/// broken and no further items should be expected.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

// ---------------------------------------------------------------------------
// Usage tracking
// ---------------------------------------------------------------------------

/// Token usage information returned by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input (prompt).
    pub input_tokens: u32,
    /// Number of tokens generated by the model.
    pub output_tokens: u32,
}
