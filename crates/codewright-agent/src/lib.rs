//! Conversation engine for the codewright coding assistant.
//!
//! This crate owns one conversation at a time: it keeps the message history,
//! drives the model through a tool-calling loop, and compacts old turns into a
//! summary when the history outgrows the context window.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//! caller ───>│        Engine / Turn         │───> TurnEvent stream
//!            └──┬────────────┬───────────┬──┘
//!               │            │           │
//!        ┌──────┴─────┐ ┌────┴─────┐ ┌───┴──────┐
//!        │ Compaction │ │   LLM    │ │  Tools   │
//!        │ (summary)  │ │ (stream) │ │(dispatch)│
//!        └──────┬─────┘ └────┬─────┘ └──────────┘
//!               └─────┬──────┘
//!                 ┌───┴─────┐
//!                 │ History │
//!                 └─────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] -- The turn loop and its event stream.
//! - [`message`] -- Messages and the session history.
//! - [`estimate`] -- Approximate token counting.
//! - [`compaction`] -- Context window compaction via conversation summarization.
//! - [`tools`] -- Tool trait, registry and error-absorbing dispatcher.
//! - [`llm`] -- Completion-service trait and the HTTP client implementing it.
//! - [`config`] -- Session and provider configuration.
//! - [`error`] -- Agent error types.

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod llm;
pub mod message;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use compaction::{CompactionConfig, Compactor};
pub use config::{AppConfig, EngineConfig, ProviderSettings};
pub use engine::{Engine, Turn, TurnEvent};
pub use error::{AgentError, Result};
pub use llm::{
    CompletionEvent, CompletionRequest, CompletionService, CompletionStream, LlmClient,
    LlmClientConfig, LlmProvider, SummaryRequest, ToolCallRequest, ToolDefinition, Usage,
};
pub use message::{History, Message};
pub use tools::{Tool, ToolOutput, ToolRegistry, dispatch};

pub use tokio_util::sync::CancellationToken;
