//! Completion-service integration layer.
//!
//! - [`types`] -- Requests, streamed events and tool definitions.
//! - [`client`] -- HTTP client for Anthropic and OpenAI-compatible APIs.
//! - [`sse`] -- Byte-stream to SSE-line plumbing shared by both decoders.
//! - [`streaming`] -- SSE decoder for Anthropic incremental responses.
//! - [`streaming_openai`] -- SSE decoder for OpenAI incremental responses.

pub mod client;
pub mod sse;
pub mod streaming;
pub mod streaming_openai;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use types::{
    CompletionEvent, CompletionRequest, CompletionStream, SummaryRequest, ToolCallRequest,
    ToolDefinition, Usage,
};

/// The model backend the engine talks to.
///
/// Implementations must be cheap to share; the engine holds one behind an
/// `Arc` for the whole session.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Start a streamed completion for the next assistant turn.
    ///
    /// Errors returned here (as opposed to inside the stream) mean the request
    /// never got going, e.g. the service was unreachable.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream>;

    /// Run a non-streaming, tool-free completion and return its text.
    async fn complete(&self, request: &SummaryRequest) -> Result<String>;
}
