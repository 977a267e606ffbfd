//! CLI argument definitions for codewright.

use std::path::PathBuf;

use clap::Parser;

/// codewright -- a terminal coding assistant.
#[derive(Debug, Parser)]
#[command(
    name = "codewright",
    version,
    about = "codewright -- terminal coding assistant",
    long_about = "Chat with a language model that can call tools on your behalf. \
                  Long conversations are summarized automatically to stay inside \
                  the model's context window."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a `.json` extension).
    #[arg(long, short, default_value = "codewright.toml")]
    pub config: PathBuf,

    /// Model id, overriding the configuration file and environment.
    #[arg(long, short)]
    pub model: Option<String>,

    /// Answer a single prompt and exit instead of starting the REPL.
    #[arg(long, short)]
    pub prompt: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}
