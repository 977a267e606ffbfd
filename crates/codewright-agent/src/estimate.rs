//! Token estimation.
//!
//! A deliberately coarse, tokenizer-free heuristic: the length of a message's
//! textual payload in bytes divided by four, truncated.  The result is only an
//! approximation of what any real model tokenizer would report.  It is the
//! single estimator behind both the compaction trigger and the compaction cut
//! search, so the two always agree with each other.

use crate::message::Message;

/// Bytes of payload counted as one token.
const BYTES_PER_TOKEN: usize = 4;

/// Approximate token cost of a single message.
///
/// Plain messages count their text.  Calls count the tool name plus the raw
/// argument text; results count the tool name plus the output text.
pub fn estimate(message: &Message) -> usize {
    let payload_len = match message {
        Message::UserText { text } | Message::AssistantText { text } => text.len(),
        Message::ToolCall {
            name, arguments, ..
        } => name.len() + arguments.len(),
        Message::ToolResult { name, output, .. } => name.len() + output.len(),
    };
    payload_len / BYTES_PER_TOKEN
}

/// Sum of [`estimate`] over a slice of messages.
pub fn estimate_all(messages: &[Message]) -> usize {
    messages.iter().map(estimate).sum()
}
