//! Interactive REPL and single-prompt mode.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use codewright_agent::{AgentError, CancellationToken, Engine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::helpers::{print_history, render_event};

/// How a turn ended.
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(AgentError),
}

/// Routes Ctrl-C to the running turn.
///
/// One watcher serves the whole process.  While a turn runs, Ctrl-C cancels
/// it; at the prompt, Ctrl-C exits.
#[derive(Clone, Default)]
pub struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    /// Start the process-wide Ctrl-C watcher.
    pub fn install() -> Self {
        let interrupts = Self::default();
        let watcher = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !watcher.interrupt() {
                    eprintln!("\n  Interrupted. Goodbye!");
                    std::process::exit(130);
                }
            }
        });
        interrupts
    }

    /// Create the token for a new turn and route Ctrl-C to it.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        token
    }

    /// Stop routing Ctrl-C to the turn.
    pub fn end(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// Cancel the running turn.  Returns `false` when no turn is running.
    pub fn interrupt(&self) -> bool {
        let Ok(current) = self.current.lock() else {
            return false;
        };
        match current.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Run one turn to completion, rendering events as they arrive.  Ctrl-C
/// cancels the turn.
pub async fn run_turn(engine: &mut Engine, interrupts: &Interrupts, query: &str) -> Outcome {
    let cancel = interrupts.begin();

    let mut turn = engine.send(query, cancel);
    let mut outcome = Outcome::Completed;
    while let Some(item) = turn.next().await {
        match item {
            Ok(event) => render_event(&event),
            Err(e) if e.is_cancelled() => outcome = Outcome::Cancelled,
            Err(e) => outcome = Outcome::Failed(e),
        }
    }
    drop(turn);
    interrupts.end();

    outcome
}

/// Answer `prompt` once and return.
pub async fn cmd_prompt(mut engine: Engine, prompt: &str) -> Result<()> {
    let interrupts = Interrupts::install();
    match run_turn(&mut engine, &interrupts, prompt).await {
        Outcome::Completed => Ok(()),
        Outcome::Cancelled => {
            eprintln!("[cancelled]");
            Ok(())
        }
        Outcome::Failed(e) => Err(e.into()),
    }
}

/// Run the interactive REPL until `quit`, `exit` or end of input.
pub async fn cmd_repl(mut engine: Engine) -> Result<()> {
    println!();
    println!("  codewright v{}", env!("CARGO_PKG_VERSION"));
    println!("  Model: {}", engine.config().model);
    println!("  Commands: /reset, /history, quit. Ctrl-C stops the current answer or exits.");
    println!();

    let interrupts = Interrupts::install();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout()).ok();

        let Some(line) = lines.next_line().await? else {
            println!();
            info!("EOF received, exiting");
            break;
        };
        let trimmed = line.trim();

        match trimmed {
            "" => continue,
            "quit" | "exit" => {
                info!("user requested exit");
                break;
            }
            "/reset" => {
                engine.reset();
                println!("  History cleared.");
                continue;
            }
            "/history" => {
                print_history(engine.history().all());
                continue;
            }
            _ => {}
        }

        match run_turn(&mut engine, &interrupts, trimmed).await {
            Outcome::Completed => {}
            Outcome::Cancelled => println!("\n[cancelled]"),
            Outcome::Failed(e) => eprintln!("\n  Error: {e}"),
        }
        println!();
    }

    info!(session_id = %engine.session_id(), "shutting down");
    Ok(())
}
