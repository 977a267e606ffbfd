//! Shared fixtures for the integration tests: a scripted completion service,
//! a few simple tools and history assertions.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::{Map, Value, json};

use codewright_agent::{
    AgentError, CompletionEvent, CompletionRequest, CompletionService, CompletionStream, Message,
    Result, SummaryRequest, Tool, ToolCallRequest, ToolOutput, Turn, TurnEvent, Usage,
};

// ═══════════════════════════════════════════════════════════════════════
//  Scripted completion service
// ═══════════════════════════════════════════════════════════════════════

/// One item of a scripted completion response.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Call(ToolCallRequest),
    Usage(u32, u32),
    /// Break the stream with an error.
    Fail(String),
    /// Never end the stream.
    Hang,
    /// Fail the request before any stream exists.
    Refuse(String),
}

pub fn text(delta: &str) -> Step {
    Step::Text(delta.to_owned())
}

pub fn call(id: &str, name: &str, arguments: &str) -> Step {
    Step::Call(ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments: arguments.to_owned(),
    })
}

/// Completion service replaying canned responses in order and recording
/// every request it receives.
#[derive(Default)]
pub struct ScriptedService {
    replies: Mutex<VecDeque<Vec<Step>>>,
    summaries: Mutex<VecDeque<std::result::Result<String, String>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub summary_requests: Mutex<Vec<SummaryRequest>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response to the next streaming request.
    pub fn reply(self, steps: Vec<Step>) -> Self {
        self.replies.lock().unwrap().push_back(steps);
        self
    }

    /// Queue a successful summary.
    pub fn summary(self, text: &str) -> Self {
        self.summaries.lock().unwrap().push_back(Ok(text.to_owned()));
        self
    }

    /// Queue a failing summary.
    pub fn summary_error(self, reason: &str) -> Self {
        self.summaries
            .lock()
            .unwrap()
            .push_back(Err(reason.to_owned()));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        self.requests.lock().unwrap().push(request.clone());

        let steps = self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            AgentError::LlmRequestFailed {
                reason: "script exhausted".into(),
            }
        })?;

        let mut events = Vec::new();
        let mut hang = false;
        for step in steps {
            match step {
                Step::Text(delta) => events.push(Ok(CompletionEvent::TextDelta(delta))),
                Step::Call(call) => events.push(Ok(CompletionEvent::ToolCall(call))),
                Step::Usage(input_tokens, output_tokens) => {
                    events.push(Ok(CompletionEvent::Usage(Usage {
                        input_tokens,
                        output_tokens,
                    })))
                }
                Step::Fail(reason) => events.push(Err(AgentError::LlmStreamError { reason })),
                Step::Hang => hang = true,
                Step::Refuse(reason) => return Err(AgentError::LlmRequestFailed { reason }),
            }
        }

        let events = stream::iter(events);
        if hang {
            Ok(Box::pin(events.chain(stream::pending())))
        } else {
            Ok(Box::pin(events))
        }
    }

    async fn complete(&self, request: &SummaryRequest) -> Result<String> {
        self.summary_requests.lock().unwrap().push(request.clone());
        match self.summaries.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(AgentError::LlmRequestFailed { reason }),
            None => Err(AgentError::LlmRequestFailed {
                reason: "no summary scripted".into(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tools
// ═══════════════════════════════════════════════════════════════════════

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument back"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(text.into())
    }
}

/// Fails on every call.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<ToolOutput> {
        Err(AgentError::ToolExecutionFailed {
            tool_name: "flaky".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Never finishes.
pub struct StallTool;

#[async_trait]
impl Tool for StallTool {
    fn name(&self) -> &str {
        "stall"
    }

    fn description(&self) -> &str {
        "Blocks forever"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<ToolOutput> {
        futures::future::pending().await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

/// Drain a turn, returning its events and the terminal error, if any.
pub async fn drain(mut turn: Turn<'_>) -> (Vec<TurnEvent>, Option<AgentError>) {
    let mut events = Vec::new();
    while let Some(item) = turn.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(e) => {
                assert!(turn.next().await.is_none(), "events after terminal error");
                return (events, Some(e));
            }
        }
    }
    (events, None)
}

/// Every tool call has exactly one result with the same id, and no plain
/// text appears while a call is unanswered.
pub fn assert_paired(messages: &[Message]) {
    let mut pending: Vec<&str> = Vec::new();
    let mut answered: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::ToolCall { id, .. } => pending.push(id),
            Message::ToolResult { id, .. } => {
                let position = pending
                    .iter()
                    .position(|p| p == id)
                    .unwrap_or_else(|| panic!("result {id} at {index} has no open call"));
                pending.remove(position);
                assert!(answered.insert(id), "call {id} answered twice");
            }
            Message::UserText { .. } | Message::AssistantText { .. } => {
                assert!(
                    pending.is_empty(),
                    "text at {index} while calls {pending:?} are open"
                );
            }
        }
    }

    assert!(pending.is_empty(), "dangling calls {pending:?}");
}
