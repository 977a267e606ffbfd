//! Agent error types.
//!
//! All engine subsystems surface errors through [`AgentError`].  Only
//! transport failures and cancellation ever terminate a turn; tool and
//! compaction failures are absorbed by the engine before they reach the
//! caller.

/// Unified error type for the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the completion service failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The completion service response could not be parsed.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool invocation failed.  Tool implementations return this; the
    /// dispatcher turns it into result text.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Control flow --------------------------------------------------------
    /// The turn was cancelled by the caller.
    #[error("turn cancelled")]
    Cancelled,

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Returns `true` for a user-initiated stop, which callers usually render
    /// differently from a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(AgentError::Cancelled.is_cancelled());
        let transport = AgentError::LlmStreamError {
            reason: "connection reset".into(),
        };
        assert!(!transport.is_cancelled());
        assert_eq!(transport.to_string(), "llm stream error: connection reset");
    }
}
