//! Shared helper functions: tracing setup, configuration loading, engine
//! construction and event rendering.

use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use codewright_agent::{AppConfig, Engine, LlmClient, Message, TurnEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so they never interleave with streamed model output.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Load the configuration file and apply environment and flag overrides.
pub fn load_config(path: &Path, model: Option<String>) -> Result<AppConfig> {
    let mut config = AppConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("invalid CODEWRIGHT_* environment override")?;
    if let Some(model) = model {
        config.engine.model = model;
    }
    Ok(config)
}

/// Build an engine talking to the configured provider.
pub fn build_engine(config: AppConfig) -> Result<Engine> {
    let client_config = config.provider.client_config().with_context(|| {
        format!(
            "set {} to your {} API key",
            config.provider.api_key_var(),
            config.provider.provider.as_str()
        )
    })?;
    let client = LlmClient::new(client_config).context("failed to create LLM client")?;

    info!(
        provider = client.provider().as_str(),
        model = %config.engine.model,
        "completion service ready"
    );

    Ok(Engine::new(config.engine, Arc::new(client)))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Print one turn event to the terminal.
pub fn render_event(event: &TurnEvent) {
    match event {
        TurnEvent::TextDelta(delta) => {
            print!("{delta}");
            io::stdout().flush().ok();
        }
        TurnEvent::AssistantMessage { .. } => println!(),
        TurnEvent::ToolCallStarted {
            name, arguments, ..
        } => {
            println!("  [tool] {name}({})", preview(arguments, 80));
        }
        TurnEvent::ToolResultReady { output, .. } => {
            println!("  [result] {}", preview(output, 120));
        }
        TurnEvent::CompactionStarted { from_tokens } => {
            println!("  [compacting history, ~{from_tokens} tokens]");
        }
        TurnEvent::CompactionFinished {
            from_tokens,
            to_tokens,
        } => {
            println!("  [history now ~{to_tokens} tokens, was ~{from_tokens}]");
        }
        TurnEvent::UsageReport {
            input_tokens,
            output_tokens,
        } => {
            tracing::debug!(input_tokens, output_tokens, "usage");
        }
    }
}

/// One line per message, for `/history`.
pub fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("  (empty)");
        return;
    }
    for (index, message) in messages.iter().enumerate() {
        let body = match message {
            Message::UserText { text } | Message::AssistantText { text } => text.as_str(),
            Message::ToolCall { name, .. } | Message::ToolResult { name, .. } => name.as_str(),
        };
        println!(
            "  {index:>3} {:<11} {}",
            message.role_label(),
            preview(body, 70)
        );
    }
}

/// First line of `text`, cut to `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    let mut out: String = first_line.chars().take(max).collect();
    if first_line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push_str(" ...");
    }
    out
}
