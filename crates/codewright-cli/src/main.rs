//! CLI entry point for codewright.
//!
//! Loads configuration, connects to the completion service and either
//! answers a single `--prompt` or starts the interactive REPL.

mod cli;
mod helpers;
mod repl;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;
use crate::helpers::{build_engine, init_tracing, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli.config, cli.model)?;
    let engine = build_engine(config)?;

    match cli.prompt {
        Some(prompt) => repl::cmd_prompt(engine, &prompt).await,
        None => repl::cmd_repl(engine).await,
    }
}
