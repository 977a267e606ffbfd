//! The turn loop.
//!
//! [`Engine::send`] starts a [`Turn`]: a pull-driven sequence of
//! [`TurnEvent`]s.  Each call to [`Turn::next`] runs until the next
//! observable event is ready:
//!
//! 1. Append the user's query.
//! 2. Before every completion request, estimate the history and compact it if
//!    it has outgrown the budget.
//! 3. Stream the completion, surfacing text deltas as they arrive and
//!    collecting completed tool calls.
//! 4. No tool calls: commit the text and stop.  Otherwise run every call in
//!    order, committing each call and its result, then go back to 2.
//!
//! History is always mutated before the matching event is returned.  A
//! stream error or cancellation ends the turn; text streamed since the last
//! commit is discarded.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::compaction::Compactor;
use crate::config::EngineConfig;
use crate::error::{AgentError, Result};
use crate::llm::CompletionService;
use crate::llm::types::{CompletionEvent, CompletionRequest, CompletionStream, ToolCallRequest};
use crate::message::{History, Message};
use crate::tools::{self, ToolRegistry};

/// Output recorded for a tool call whose execution was abandoned.
pub const CANCELLED_TOOL_OUTPUT: &str = "error: tool call cancelled";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something observable that happened during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A chunk of assistant text, surfaced as soon as it is streamed.
    TextDelta(String),

    /// Assistant text was committed to history.
    AssistantMessage { text: String },

    /// A tool call was committed and is about to run.
    ToolCallStarted {
        id: String,
        name: String,
        arguments: String,
    },

    /// A tool result was committed.
    ToolResultReady {
        id: String,
        name: String,
        output: String,
    },

    /// The history is over budget and is being compacted.
    CompactionStarted { from_tokens: usize },

    /// Compaction ended.  `to_tokens == from_tokens` when nothing changed.
    CompactionFinished { from_tokens: usize, to_tokens: usize },

    /// Token accounting reported by the completion service.
    UsageReport {
        input_tokens: u32,
        output_tokens: u32,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One conversation session: configuration, history and tools.
pub struct Engine {
    session_id: Uuid,
    config: EngineConfig,
    service: Arc<dyn CompletionService>,
    compactor: Compactor,
    tools: ToolRegistry,
    history: History,
}

impl Engine {
    /// Create a session with an empty history and no tools.
    pub fn new(config: EngineConfig, service: Arc<dyn CompletionService>) -> Self {
        let session_id = Uuid::now_v7();
        let compactor = Compactor::new(config.compaction, config.model.clone());

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            max_context_tokens = config.compaction.max_context_tokens,
            "session created"
        );

        Self {
            session_id,
            config,
            service,
            compactor,
            tools: ToolRegistry::new(),
            history: History::new(),
        }
    }

    /// Replace the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Tools may be added or removed between turns; each completion request
    /// reads the registry afresh.
    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// Forget the conversation.
    pub fn reset(&mut self) {
        tracing::info!(
            session_id = %self.session_id,
            discarded = self.history.len(),
            "history cleared"
        );
        self.history.clear();
    }

    /// Start a turn for `query`.
    ///
    /// Nothing happens until the returned [`Turn`] is polled.  Cancelling
    /// `cancel` aborts whichever stream read, tool call or summary request is
    /// in progress and ends the turn with [`AgentError::Cancelled`].
    pub fn send(&mut self, query: impl Into<String>, cancel: CancellationToken) -> Turn<'_> {
        Turn {
            engine: self,
            cancel,
            phase: Phase::Start {
                query: query.into(),
            },
            in_flight: None,
            requests: 0,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("messages", &self.history.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Turn state machine
// ---------------------------------------------------------------------------

enum Phase {
    Start {
        query: String,
    },
    Check,
    Compacting {
        from_tokens: usize,
    },
    Request,
    Streaming {
        stream: CompletionStream,
        text: String,
        calls: Vec<ToolCallRequest>,
    },
    Dispatch {
        calls: VecDeque<ToolCallRequest>,
    },
    Executing {
        call: ToolCallRequest,
        rest: VecDeque<ToolCallRequest>,
    },
    /// A `next()` future was dropped before its step finished.
    Interrupted,
    Done,
}

/// A running turn.  Obtained from [`Engine::send`].
///
/// Dropping a turn early leaves the history valid: everything committed so
/// far stays, and a tool call that was started but not answered gets a
/// cancellation result.
pub struct Turn<'a> {
    engine: &'a mut Engine,
    cancel: CancellationToken,
    phase: Phase,
    in_flight: Option<ToolCallRequest>,
    requests: u32,
}

impl Turn<'_> {
    /// Advance to the next event.
    ///
    /// Returns `None` once the turn has ended, including after an error has
    /// been returned.
    ///
    /// Not cancel-safe.  If the returned future is dropped before it
    /// resolves (for example by `tokio::time::timeout` or a losing
    /// `select!` branch), the step it was running is lost and the turn
    /// cannot resume.  The following call then reports
    /// [`AgentError::Cancelled`] and settles any started tool call, exactly
    /// as if the token had been cancelled.
    pub async fn next(&mut self) -> Option<Result<TurnEvent>> {
        loop {
            if matches!(self.phase, Phase::Done) {
                return None;
            }
            if matches!(self.phase, Phase::Interrupted) {
                tracing::warn!(
                    session_id = %self.engine.session_id,
                    "turn polled after an abandoned step"
                );
                return Some(Err(self.abort()));
            }
            if self.cancel.is_cancelled() {
                return Some(Err(self.abort()));
            }

            match self.step().await {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => {
                    self.phase = Phase::Done;
                    if e.is_cancelled() {
                        return Some(Err(self.abort()));
                    }
                    tracing::warn!(
                        session_id = %self.engine.session_id,
                        error = %e,
                        "turn failed"
                    );
                    return Some(Err(e));
                }
            }
        }
    }

    /// Drive the turn to the end, discarding events.
    pub async fn finish(mut self) -> Result<()> {
        while let Some(event) = self.next().await {
            event?;
        }
        Ok(())
    }

    /// Run one transition.  `Ok(None)` means no event was produced.
    async fn step(&mut self) -> Result<Option<TurnEvent>> {
        match std::mem::replace(&mut self.phase, Phase::Interrupted) {
            Phase::Start { query } => {
                tracing::info!(
                    session_id = %self.engine.session_id,
                    history = self.engine.history.len(),
                    "turn started"
                );
                self.engine.history.append(Message::user(query));
                self.phase = Phase::Check;
                Ok(None)
            }

            Phase::Check => {
                let tokens = self.engine.history.estimate_tokens();
                if self.engine.compactor.should_compact(tokens) {
                    self.phase = Phase::Compacting {
                        from_tokens: tokens,
                    };
                    return Ok(Some(TurnEvent::CompactionStarted {
                        from_tokens: tokens,
                    }));
                }
                self.phase = Phase::Request;
                Ok(None)
            }

            Phase::Compacting { from_tokens } => {
                let to_tokens = self.compact(from_tokens).await?;
                self.phase = Phase::Request;
                Ok(Some(TurnEvent::CompactionFinished {
                    from_tokens,
                    to_tokens,
                }))
            }

            Phase::Request => {
                let engine = &*self.engine;
                let request = CompletionRequest {
                    model: engine.config.model.clone(),
                    instructions: engine.config.instructions.clone(),
                    input: engine.history.all().to_vec(),
                    tools: engine.tools.definitions(),
                };
                self.requests += 1;
                tracing::debug!(
                    session_id = %engine.session_id,
                    request = self.requests,
                    messages = request.input.len(),
                    tools = request.tools.len(),
                    "requesting completion"
                );

                let stream = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    stream = engine.service.stream(&request) => stream?,
                };

                self.phase = Phase::Streaming {
                    stream,
                    text: String::new(),
                    calls: Vec::new(),
                };
                Ok(None)
            }

            Phase::Streaming {
                mut stream,
                mut text,
                mut calls,
            } => {
                let item = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    item = stream.next() => item,
                };

                match item {
                    Some(Ok(CompletionEvent::TextDelta(delta))) => {
                        let event = (!delta.is_empty()).then(|| {
                            text.push_str(&delta);
                            TurnEvent::TextDelta(delta)
                        });
                        self.phase = Phase::Streaming {
                            stream,
                            text,
                            calls,
                        };
                        Ok(event)
                    }
                    Some(Ok(CompletionEvent::ToolCall(call))) => {
                        calls.push(call);
                        self.phase = Phase::Streaming {
                            stream,
                            text,
                            calls,
                        };
                        Ok(None)
                    }
                    Some(Ok(CompletionEvent::Usage(usage))) => {
                        self.phase = Phase::Streaming {
                            stream,
                            text,
                            calls,
                        };
                        Ok(Some(TurnEvent::UsageReport {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        }))
                    }
                    Some(Err(e)) => Err(e),
                    None => Ok(self.complete_response(text, calls)),
                }
            }

            Phase::Dispatch { mut calls } => {
                let Some(call) = calls.pop_front() else {
                    self.phase = Phase::Check;
                    return Ok(None);
                };

                self.engine.history.append(Message::tool_call(
                    call.id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                ));
                self.in_flight = Some(call.clone());

                let event = TurnEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                };
                self.phase = Phase::Executing { call, rest: calls };
                Ok(Some(event))
            }

            Phase::Executing { call, rest } => {
                let output = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    output = tools::dispatch(&call.name, &call.arguments, &self.engine.tools) => output,
                };

                tracing::debug!(
                    session_id = %self.engine.session_id,
                    tool = %call.name,
                    id = %call.id,
                    bytes = output.len(),
                    "tool finished"
                );

                self.engine.history.append(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    output.clone(),
                ));
                self.in_flight = None;
                self.phase = Phase::Dispatch { calls: rest };

                Ok(Some(TurnEvent::ToolResultReady {
                    id: call.id,
                    name: call.name,
                    output,
                }))
            }

            Phase::Interrupted => Err(AgentError::Cancelled),

            Phase::Done => {
                self.phase = Phase::Done;
                Ok(None)
            }
        }
    }

    /// Handle the end of a completion stream.
    fn complete_response(
        &mut self,
        text: String,
        calls: Vec<ToolCallRequest>,
    ) -> Option<TurnEvent> {
        let committed = (!text.is_empty()).then(|| {
            self.engine.history.append(Message::assistant(text.clone()));
            TurnEvent::AssistantMessage { text }
        });

        if calls.is_empty() {
            tracing::info!(
                session_id = %self.engine.session_id,
                requests = self.requests,
                history = self.engine.history.len(),
                "turn complete"
            );
            self.phase = Phase::Done;
        } else {
            tracing::info!(
                session_id = %self.engine.session_id,
                tool_count = calls.len(),
                tools = ?calls.iter().map(|c| &c.name).collect::<Vec<_>>(),
                "model requested tool calls"
            );
            self.phase = Phase::Dispatch {
                calls: calls.into(),
            };
        }

        committed
    }

    /// Run compaction, returning the resulting estimate.  Summarization
    /// failures leave the history as it was and report `from_tokens`.
    async fn compact(&mut self, from_tokens: usize) -> Result<usize> {
        let engine = &mut *self.engine;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = engine.compactor.compact(&mut engine.history, engine.service.as_ref()) => outcome,
        };

        match outcome {
            Ok(Some(to_tokens)) => {
                tracing::info!(
                    session_id = %engine.session_id,
                    from_tokens,
                    to_tokens,
                    "history compacted"
                );
                Ok(to_tokens)
            }
            Ok(None) => Ok(from_tokens),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(
                    session_id = %engine.session_id,
                    error = %e,
                    "compaction failed, continuing with full history"
                );
                Ok(from_tokens)
            }
        }
    }

    /// End the turn because it was cancelled.
    fn abort(&mut self) -> AgentError {
        self.phase = Phase::Done;
        self.settle_in_flight();
        tracing::info!(session_id = %self.engine.session_id, "turn cancelled");
        AgentError::Cancelled
    }

    /// Record a result for a started but unanswered tool call.
    fn settle_in_flight(&mut self) {
        if let Some(call) = self.in_flight.take() {
            tracing::debug!(
                session_id = %self.engine.session_id,
                tool = %call.name,
                id = %call.id,
                "abandoning tool call"
            );
            self.engine.history.append(Message::tool_result(
                call.id,
                call.name,
                CANCELLED_TOOL_OUTPUT,
            ));
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.settle_in_flight();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
