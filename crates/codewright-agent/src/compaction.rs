//! Context compaction -- summarize old conversation turns so the history
//! stays inside the model's context window.
//!
//! When the estimated input size exceeds
//! `max_context_tokens - reserve_tokens`, the compactor:
//!
//! 1. Walks the history from the newest message backwards until at least
//!    `keep_recent_tokens` worth of messages has been seen.  That index is the
//!    tentative cut.
//! 2. Moves the cut further back past any tool calls or results so the kept
//!    suffix starts on plain text and no call is separated from its result.
//! 3. Asks the completion service to summarize everything before the cut.
//! 4. Rewrites the history as `[summary] + history[cut..]`.
//!
//! Every step that finds nothing safe to cut turns the whole operation into a
//! no-op.  All sizes come from [`crate::estimate`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::estimate;
use crate::llm::CompletionService;
use crate::llm::types::SummaryRequest;
use crate::message::{History, Message};

/// Instructions for the summarization request.
const SUMMARY_INSTRUCTIONS: &str = "You are compacting the history of a coding session \
between a user, an AI coding assistant and the tools it called. Summarize the transcript \
concisely, preserving the user's goals, decisions made, files and commands involved, \
important tool results and any unfinished work, so the assistant can continue the session \
from the summary alone. Be factual and brief.";

/// Heading of the synthetic message that replaces the compacted prefix.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

/// Tool output longer than this (in characters) is truncated in transcripts.
const MAX_TRANSCRIPT_OUTPUT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Token budgets governing compaction, in estimated-token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Hard ceiling before compaction is considered.  `0` disables it.
    pub max_context_tokens: usize,
    /// Headroom below the ceiling at which compaction starts.
    pub reserve_tokens: usize,
    /// Minimum size of the most recent messages that survive uncompacted.
    pub keep_recent_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 0,
            reserve_tokens: 16_384,
            keep_recent_tokens: 20_000,
        }
    }
}

impl CompactionConfig {
    /// Whether a request of `estimated_input_tokens` should be compacted first.
    pub fn should_compact(&self, estimated_input_tokens: usize) -> bool {
        self.max_context_tokens > 0
            && estimated_input_tokens > self.max_context_tokens.saturating_sub(self.reserve_tokens)
    }
}

// ---------------------------------------------------------------------------
// Cut point selection
// ---------------------------------------------------------------------------

/// Scan from the newest message backwards and return the first index at which
/// the running estimate reaches `keep_recent_tokens`.
///
/// Returns `None` when the whole history is smaller than the budget.
pub fn tentative_cut(messages: &[Message], keep_recent_tokens: usize) -> Option<usize> {
    let mut kept = 0usize;
    for (index, message) in messages.iter().enumerate().rev() {
        kept += estimate::estimate(message);
        if kept >= keep_recent_tokens {
            return Some(index);
        }
    }
    None
}

/// Continue the backward walk from `cut` past any run of tool calls and
/// results, returning the index of the first plain-text message found.
///
/// Returns `None` when only tool traffic lies between `cut` and the start of
/// the history.
pub fn adjust_cut(messages: &[Message], cut: usize) -> Option<usize> {
    let mut index = cut.min(messages.len().checked_sub(1)?);
    loop {
        if !messages[index].is_tool_traffic() {
            return Some(index);
        }
        index = index.checked_sub(1)?;
    }
}

/// Full cut-point search: [`tentative_cut`], then [`adjust_cut`], then the
/// bounds check.  `None` means compaction should not happen this round.
pub fn find_cut_point(messages: &[Message], keep_recent_tokens: usize) -> Option<usize> {
    if messages.len() < 2 {
        return None;
    }
    let tentative = tentative_cut(messages, keep_recent_tokens)?;
    let cut = adjust_cut(messages, tentative)?;
    (cut > 0 && cut < messages.len()).then_some(cut)
}

// ---------------------------------------------------------------------------
// Compactor
// ---------------------------------------------------------------------------

/// Runs compaction for one session.
#[derive(Debug, Clone)]
pub struct Compactor {
    config: CompactionConfig,
    model: String,
}

impl Compactor {
    /// Create a compactor summarizing with `model`.
    pub fn new(config: CompactionConfig, model: impl Into<String>) -> Self {
        Self {
            config,
            model: model.into(),
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// See [`CompactionConfig::should_compact`].
    pub fn should_compact(&self, estimated_input_tokens: usize) -> bool {
        self.config.should_compact(estimated_input_tokens)
    }

    /// Compact `history` in place.
    ///
    /// Returns `Ok(Some(tokens))` with the estimated size of the rewritten
    /// history, or `Ok(None)` if there was nothing safe to cut.
    ///
    /// # Errors
    ///
    /// Propagates the summarization failure.  The history is left untouched
    /// in that case.
    pub async fn compact(
        &self,
        history: &mut History,
        service: &dyn CompletionService,
    ) -> Result<Option<usize>> {
        let Some(cut) = find_cut_point(history.all(), self.config.keep_recent_tokens) else {
            debug!(
                messages = history.len(),
                keep_recent_tokens = self.config.keep_recent_tokens,
                "no safe cut point, skipping compaction"
            );
            return Ok(None);
        };

        let transcript = format_transcript(&history.all()[..cut]);
        let request = SummaryRequest {
            model: self.model.clone(),
            instructions: SUMMARY_INSTRUCTIONS.to_owned(),
            input: transcript,
        };

        debug!(model = %self.model, cut, "requesting conversation summary");
        let summary = service.complete(&request).await?;

        history.replace_prefix(cut, summary_message(&summary));
        let tokens = history.estimate_tokens();

        info!(
            summarized = cut,
            retained = history.len() - 1,
            tokens,
            "compaction complete"
        );

        Ok(Some(tokens))
    }
}

/// The synthetic user message carrying a summary.
pub fn summary_message(summary: &str) -> Message {
    Message::user(format!("{SUMMARY_PREFIX}\n{}", summary.trim()))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Render messages as a plain-text transcript, one entry per line.
fn format_transcript(messages: &[Message]) -> String {
    let mut buf = String::with_capacity(messages.len() * 200);
    for msg in messages {
        match msg {
            Message::UserText { text } | Message::AssistantText { text } => {
                buf.push_str(msg.role_label());
                buf.push_str(": ");
                buf.push_str(text);
            }
            Message::ToolCall {
                name, arguments, ..
            } => {
                buf.push_str(&format!("tool_call: {name}({arguments})"));
            }
            Message::ToolResult { output, .. } => {
                buf.push_str("tool_result: ");
                buf.push_str(&truncate_output(output));
            }
        }
        buf.push('\n');
    }
    buf
}

fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(MAX_TRANSCRIPT_OUTPUT_CHARS) {
        Some((byte_index, _)) => format!("{}... [truncated]", &output[..byte_index]),
        None => output.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
