//! Runtime event schema.
//!
//! [`WireEvent`] is what an agent runtime emits while it works on a turn.
//! [`TaskEvent`] is what the task store publishes to frontends. Both
//! serialize with `type`/`payload` tags so they can be forwarded as JSON
//! unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::approvals::{ApprovalRequest, ApprovalResponse};
use crate::tools::ToolOutcome;

// ---------------------------------------------------------------------------
// Task input and status
// ---------------------------------------------------------------------------

/// User input carried by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskInput {
    Text(String),
    /// Structured content parts, passed to the runtime untouched.
    Parts(Vec<serde_json::Value>),
}

impl TaskInput {
    /// Text view of the input. Structured parts contribute their `text` fields.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for TaskInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for TaskInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    WaitingApproval,
    Cancelling,
    Succeeded,
    Failed,
    /// Stopped at the step ceiling. Terminal, distinct from failure.
    MaxStepsReached,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::MaxStepsReached | Self::Cancelled
        )
    }

    /// Label used by the banner and `/tasks`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Working",
            Self::WaitingApproval => "Waiting approval",
            Self::Cancelling => "Cancelling",
            Self::Succeeded => "Done",
            Self::Failed => "Failed",
            Self::MaxStepsReached => "Max steps",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Cancelling => "cancelling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::MaxStepsReached => "max_steps_reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time copy of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: u64,
    pub command: String,
    pub thinking: bool,
    pub status: TaskStatus,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    /// Last time anything happened to the task; orders the banner.
    pub last_active_ms: u64,
    pub fade_deadline_ms: Option<u64>,
    pub logs: Vec<String>,
    pub pending_approvals: Vec<String>,
    /// One-line summary, present once the task is terminal.
    pub summary: Option<String>,
}

/// Point-in-time copy of one outstanding approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalSnapshot {
    pub id: String,
    pub task_id: u64,
    pub sender: String,
    pub action: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Wire events (runtime -> orchestrator)
// ---------------------------------------------------------------------------

/// One unit of an agent runtime's output stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireEvent {
    StepBegin {
        n: u32,
    },
    StepInterrupted,
    CompactionBegin,
    CompactionEnd,
    StatusUpdate {
        /// Fraction of the context window in use, 0.0..=1.0.
        context_usage: Option<f64>,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    ToolCallDelta {
        id: String,
        arguments_delta: String,
    },
    ToolResult {
        tool_call_id: String,
        outcome: ToolOutcome,
    },
    ApprovalRequest(ApprovalRequest),
    Subagent {
        name: String,
        event: Box<WireEvent>,
    },
    /// Anything a runtime emits that this crate has no dedicated case for.
    Other {
        kind: String,
        payload: serde_json::Value,
    },
}

impl WireEvent {
    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &str {
        match self {
            Self::StepBegin { .. } => "step_begin",
            Self::StepInterrupted => "step_interrupted",
            Self::CompactionBegin => "compaction_begin",
            Self::CompactionEnd => "compaction_end",
            Self::StatusUpdate { .. } => "status_update",
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallDelta { .. } => "tool_call_delta",
            Self::ToolResult { .. } => "tool_result",
            Self::ApprovalRequest(_) => "approval_request",
            Self::Subagent { .. } => "subagent",
            Self::Other { kind, .. } => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Task events (store -> frontends)
// ---------------------------------------------------------------------------

/// Monotonic envelope for task events.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEventEnvelope {
    pub seq: u64,
    pub ts_unix_ms: u64,
    pub event: TaskEvent,
}

/// Changes published by the task store.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskEvent {
    Queued {
        task_id: u64,
        command: String,
    },
    StatusChanged {
        task_id: u64,
        status: TaskStatus,
    },
    Log {
        task_id: u64,
        line: String,
    },
    /// Raw runtime event, forwarded in arrival order.
    Wire {
        task_id: u64,
        event: WireEvent,
    },
    ApprovalRequested {
        approval: ApprovalSnapshot,
        prompt: String,
    },
    ApprovalResolved {
        task_id: u64,
        approval_id: String,
        response: ApprovalResponse,
    },
    Finished {
        task_id: u64,
        status: TaskStatus,
        summary: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> u64 {
        match self {
            Self::Queued { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::Log { task_id, .. }
            | Self::Wire { task_id, .. }
            | Self::ApprovalResolved { task_id, .. }
            | Self::Finished { task_id, .. } => *task_id,
            Self::ApprovalRequested { approval, .. } => approval.task_id,
        }
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_events_serialize_with_type_and_payload() {
        let event = WireEvent::StepBegin { n: 2 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step_begin");
        assert_eq!(value["payload"]["n"], 2);

        let unit = serde_json::to_value(WireEvent::CompactionEnd).unwrap();
        assert_eq!(unit["type"], "compaction_end");
    }

    #[test]
    fn other_event_reports_its_own_kind() {
        let event = WireEvent::Other {
            kind: "plan_update".into(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(event.kind(), "plan_update");
        assert_eq!(WireEvent::StepInterrupted.kind(), "step_interrupted");
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::MaxStepsReached.is_terminal());
        assert!(!TaskStatus::Cancelling.is_terminal());
        assert!(!TaskStatus::WaitingApproval.is_terminal());
        assert_eq!(TaskStatus::WaitingApproval.to_string(), "waiting_approval");
    }

    #[test]
    fn structured_input_exposes_text_parts() {
        let input: TaskInput = serde_json::from_str(
            r#"[{"type":"text","text":"hello"},{"type":"image_url"},{"type":"text","text":"world"}]"#,
        )
        .unwrap();
        assert_eq!(input.as_text(), "hello\nworld");
        let plain: TaskInput = serde_json::from_str(r#""ls""#).unwrap();
        assert_eq!(plain, TaskInput::Text("ls".into()));
    }
}
