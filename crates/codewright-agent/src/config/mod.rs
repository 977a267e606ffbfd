//! Session and provider configuration.
//!
//! Configuration is read once, before an engine is constructed, from a TOML
//! file (or JSON when the path ends in `.json`) and then patched with
//! `CODEWRIGHT_*` environment variables.  Nothing here is reloaded while a
//! session runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compaction::CompactionConfig;
use crate::error::{AgentError, Result};
use crate::llm::{LlmClientConfig, LlmProvider};

/// Model used when neither the file nor the environment names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default system prompt.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a careful software engineering assistant \
working in the user's repository. Use the available tools to inspect and change files, \
explain what you did, and ask when a request is ambiguous.";

/// Environment variable overriding [`EngineConfig::model`].
pub const ENV_MODEL: &str = "CODEWRIGHT_MODEL";
/// Environment variable overriding [`ProviderSettings::provider`].
pub const ENV_PROVIDER: &str = "CODEWRIGHT_PROVIDER";
/// Environment variable overriding [`ProviderSettings::base_url`].
pub const ENV_BASE_URL: &str = "CODEWRIGHT_BASE_URL";
/// Environment variable overriding [`CompactionConfig::max_context_tokens`].
pub const ENV_MAX_CONTEXT_TOKENS: &str = "CODEWRIGHT_MAX_CONTEXT_TOKENS";

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Static configuration of one conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Completion model id, used for turns and for compaction summaries.
    pub model: String,
    /// System instructions sent with every turn.
    pub instructions: String,
    /// Context budgets.
    pub compaction: CompactionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration for `model` with default instructions and budgets.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }
}

// ---------------------------------------------------------------------------
// Provider settings
// ---------------------------------------------------------------------------

/// Which HTTP completion service to talk to and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider: LlmProvider,
    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: None,
            api_key_env: None,
            max_tokens: 4096,
        }
    }
}

impl ProviderSettings {
    /// The environment variable the API key is read from.
    pub fn api_key_var(&self) -> &str {
        match (&self.api_key_env, self.provider) {
            (Some(var), _) => var.as_str(),
            (None, LlmProvider::Anthropic) => "ANTHROPIC_API_KEY",
            (None, LlmProvider::OpenAI) => "OPENAI_API_KEY",
        }
    }

    /// Build a client configuration, reading the key from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingApiKey`] when the variable is unset or
    /// empty.
    pub fn client_config(&self) -> Result<LlmClientConfig> {
        self.client_config_with(|key| std::env::var(key).ok())
    }

    /// Like [`client_config`](Self::client_config) with an explicit variable
    /// lookup.
    pub fn client_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LlmClientConfig> {
        let api_key = lookup(self.api_key_var())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::MissingApiKey {
                provider: self.provider.as_str().to_owned(),
            })?;

        let base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_owned());

        Ok(LlmClientConfig {
            provider: self.provider,
            api_key,
            base_url,
            max_tokens: self.max_tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// Application configuration
// ---------------------------------------------------------------------------

/// Everything a front end needs to start a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub provider: ProviderSettings,
}

impl AppConfig {
    /// Load from `path`.  A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_toml_str(&raw)?
        };

        info!(
            path = %path.display(),
            model = %config.engine.model,
            provider = config.provider.provider.as_str(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AgentError::ConfigError {
            reason: format!("invalid TOML config: {e}"),
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| AgentError::ConfigError {
            reason: format!("invalid JSON config: {e}"),
        })
    }

    /// Apply `CODEWRIGHT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] for an unknown provider name or a
    /// non-numeric token budget.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.is_empty()) {
            debug!(model = %model, "model overridden from environment");
            self.engine.model = model;
        }

        if let Some(provider) = lookup(ENV_PROVIDER).filter(|v| !v.is_empty()) {
            self.provider.provider = parse_provider(&provider)?;
        }

        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.provider.base_url = Some(base_url);
        }

        if let Some(max) = lookup(ENV_MAX_CONTEXT_TOKENS).filter(|v| !v.is_empty()) {
            self.engine.compaction.max_context_tokens =
                max.trim().parse().map_err(|e| AgentError::ConfigError {
                    reason: format!("{ENV_MAX_CONTEXT_TOKENS} must be a whole number: {e}"),
                })?;
        }

        Ok(())
    }
}

fn parse_provider(name: &str) -> Result<LlmProvider> {
    match name.trim().to_ascii_lowercase().as_str() {
        "anthropic" => Ok(LlmProvider::Anthropic),
        "openai" | "openai-compatible" => Ok(LlmProvider::OpenAI),
        other => Err(AgentError::ConfigError {
            reason: format!("unknown provider `{other}`"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
