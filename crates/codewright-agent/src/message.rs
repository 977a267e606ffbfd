//! Conversation history.
//!
//! A [`Message`] is one unit of exchange between the user, the model and the
//! tools.  [`History`] is the ordered, append-only sequence of messages that
//! the engine owns for one session.  Apart from [`History::clear`] and the
//! prefix rewrite performed by compaction, messages are only ever appended.
//!
//! Pairing rule: every [`Message::ToolCall`] is followed by the
//! [`Message::ToolResult`] carrying the same id before any further plain text
//! appears.  The turn loop upholds this by construction; the history itself
//! does not validate appends.

use serde::{Deserialize, Serialize};

use crate::estimate;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Input from the human user (also used for compaction summaries).
    UserText { text: String },

    /// Plain text produced by the model.
    AssistantText { text: String },

    /// A model-issued request to invoke a tool.
    ToolCall {
        /// Identifier assigned by the model, echoed by the matching result.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Raw JSON argument text as produced by the model.
        arguments: String,
    },

    /// The dispatcher's answer to a prior [`Message::ToolCall`].
    ToolResult {
        id: String,
        name: String,
        output: String,
    },
}

impl Message {
    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    /// Create an assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    /// Create a tool call message.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            id: id.into(),
            name: name.into(),
            output: output.into(),
        }
    }

    /// Whether this message is part of a call/result pair.
    pub fn is_tool_traffic(&self) -> bool {
        matches!(self, Self::ToolCall { .. } | Self::ToolResult { .. })
    }

    /// Short role label used in transcripts and logs.
    pub fn role_label(&self) -> &'static str {
        match self {
            Self::UserText { .. } => "user",
            Self::AssistantText { .. } => "assistant",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Approximate token cost of this message.  See [`estimate::estimate`].
    pub fn estimated_tokens(&self) -> usize {
        estimate::estimate(self)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Ordered message history for one conversation session.
#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in insertion order.
    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    /// Discard every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sum of the estimated token cost of every message.
    pub fn estimate_tokens(&self) -> usize {
        estimate::estimate_all(&self.messages)
    }

    /// Ids of tool calls that have no matching result yet, oldest first.
    pub fn dangling_tool_calls(&self) -> Vec<&str> {
        let mut pending: Vec<&str> = Vec::new();
        for message in &self.messages {
            match message {
                Message::ToolCall { id, .. } => pending.push(id),
                Message::ToolResult { id, .. } => pending.retain(|p| p != id),
                _ => {}
            }
        }
        pending
    }

    /// Replace `messages[..cut]` with a single summary message.
    ///
    /// Callers must pass `0 < cut < len`.
    pub(crate) fn replace_prefix(&mut self, cut: usize, summary: Message) {
        let retained = self.messages.split_off(cut);
        self.messages.clear();
        self.messages.reserve(retained.len() + 1);
        self.messages.push(summary);
        self.messages.extend(retained);
    }
}

impl From<Vec<Message>> for History {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
