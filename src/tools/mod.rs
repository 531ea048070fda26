//! Pluggable tool system.
//!
//! Tools are async trait objects an agent runtime invokes by name. Each call
//! gets a [`ToolContext`] carrying the task's approval gate and cancellation
//! signal, and returns a [`ToolOutcome`] that is forwarded to the wire as a
//! tool result.

pub mod execution;
pub mod rewrite;
pub mod shell;
pub mod transcript;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ToolError;
use crate::runtime::approvals::ApprovalGate;
use crate::runtime::CancelSignal;

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Per-call context handed to tools.
#[derive(Clone)]
pub struct ToolContext {
    pub approvals: ApprovalGate,
    pub cancel: CancelSignal,
}

/// Result of a tool call as seen by the agent and the task log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutcome {
    pub ok: bool,
    /// Full output, e.g. a command transcript.
    pub output: String,
    /// Message returned to the model.
    pub message: String,
    /// Short summary for logs and status lines.
    pub brief: String,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            message: message.into(),
            brief: String::new(),
        }
    }

    pub fn error(
        output: impl Into<String>,
        message: impl Into<String>,
        brief: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            output: output.into(),
            message: message.into(),
            brief: brief.into(),
        }
    }

    /// Outcome for a call a human declined.
    pub fn rejected() -> Self {
        Self::error(
            "",
            "The tool call was rejected by the user. Follow the user's new instructions.",
            "Rejected by user",
        )
    }
}

/// A tool that an agent runtime can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the runtime calls.
    fn name(&self) -> &'static str;

    /// One-line description for tool listings.
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> serde_json::Value;

    /// Execute with a JSON arguments string.
    async fn call(&self, arguments: &str, context: &ToolContext) -> Result<ToolOutcome, ToolError>;
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

/// Registry of available tools, dispatched by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Box::new(tool));
    }

    /// Find a tool by name and execute it.
    pub async fn call(
        &self,
        name: &str,
        arguments: &str,
        context: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::ExecutionFailed(format!("unknown tool: {name}")))?;
        tool.call(arguments, context).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::approvals::ApprovalPolicy;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes arguments back"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn call(
            &self,
            arguments: &str,
            _context: &ToolContext,
        ) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok(arguments, "echoed"))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            approvals: ApprovalGate::detached(ApprovalPolicy::default()),
            cancel: CancelSignal::new(),
        }
    }

    #[tokio::test]
    async fn call_known_tool_returns_outcome() {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        let out = r.call("echo", r#"{"x":1}"#, &context()).await.unwrap();
        assert!(out.ok);
        assert_eq!(out.output, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn call_unknown_tool_returns_error() {
        let r = ToolRegistry::new();
        let err = r.call("nonexistent", "{}", &context()).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn rejected_outcome_has_brief() {
        let out = ToolOutcome::rejected();
        assert!(!out.ok);
        assert_eq!(out.brief, "Rejected by user");
    }
}
