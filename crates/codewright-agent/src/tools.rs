//! Tool capability interface, registry and dispatcher.
//!
//! Any type implementing [`Tool`] can be registered; the engine never looks
//! past the trait.  [`dispatch`] never fails: unknown tools, undecodable
//! arguments and tool errors all come back as `error: ...` text so the model
//! can see and react to its own mistake.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::llm::types::ToolDefinition;

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Something the model can invoke by name.
///
/// Filesystem, shell, protocol-bridged and in-memory tools all plug in
/// through this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn parameters(&self) -> Value;

    /// Run the tool with decoded arguments.
    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput>;

    /// The definition sent to the completion service.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            input_schema: self.parameters(),
        }
    }
}

/// What a successful tool invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain text, passed to the model verbatim.
    Text(String),
    /// Structured data, serialized to JSON text for the model.
    Structured(Value),
}

impl ToolOutput {
    /// Render the output as the text stored in the tool result.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered collection of tools available to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.  A tool with the same name is replaced in place so the
    /// declared order stays stable.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Remove a tool by name, returning it if it was registered.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let index = self.tools.iter().position(|t| t.name() == name)?;
        Some(self.tools.remove(index))
    }

    /// Linear lookup by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Definitions of every registered tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolve `name` in `registry`, decode `arguments` and run the tool.
///
/// Always returns the text to store in the tool result.  Empty argument text
/// is treated as an empty object.
pub async fn dispatch(name: &str, arguments: &str, registry: &ToolRegistry) -> String {
    let Some(tool) = registry.get(name) else {
        tracing::warn!(tool = name, "model requested unknown tool");
        return format!("error: unknown tool {name}");
    };

    let args = match decode_arguments(arguments) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "tool arguments did not decode");
            return format!("error: failed to parse arguments: {e}");
        }
    };

    tracing::debug!(tool = name, "executing tool");
    match tool.execute(args).await {
        Ok(output) => output.into_text(),
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "tool execution failed");
            format!("error: {e}")
        }
    }
}

fn decode_arguments(arguments: &str) -> serde_json::Result<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(arguments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
