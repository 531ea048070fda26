//! Projection of a runtime's wire events into task log lines.

use std::collections::HashMap;
use tokio::sync::mpsc;

use super::schema::WireEvent;
use super::store::TaskStore;
use crate::textutil::{shorten, ELLIPSIS};

/// Transcript lines of the shell tool copied into the task log.
const MAX_BASH_TRANSCRIPT_LINES: usize = 6;
const SHELL_TOOL_NAME: &str = "Bash";

/// Consumes one task's wire events, forwards each to store subscribers and
/// writes a human-readable log.
pub(crate) struct TaskObserver {
    store: TaskStore,
    task_id: u64,
    tool_names: HashMap<String, String>,
    text: String,
    thinking: String,
}

impl TaskObserver {
    pub(crate) fn new(store: TaskStore, task_id: u64) -> Self {
        Self {
            store,
            task_id,
            tool_names: HashMap::new(),
            text: String::new(),
            thinking: String::new(),
        }
    }

    /// Drain `events` until every sender is gone, then flush buffered text.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<WireEvent>) {
        while let Some(event) = events.recv().await {
            self.observe(event);
        }
        self.flush();
    }

    pub(crate) fn observe(&mut self, event: WireEvent) {
        self.store.publish_wire(self.task_id, event.clone());

        match event {
            WireEvent::TextDelta { text } => {
                self.flush_thinking();
                self.text.push_str(&text);
                return;
            }
            WireEvent::ThinkingDelta { text } => {
                self.flush_text();
                self.thinking.push_str(&text);
                return;
            }
            _ => self.flush(),
        }

        match event {
            WireEvent::TextDelta { .. } | WireEvent::ThinkingDelta { .. } => {}
            WireEvent::StepBegin { n } => self.log(format!("Step {n} started")),
            WireEvent::StepInterrupted => self.log("Step interrupted".to_string()),
            WireEvent::CompactionBegin => self.log(format!("Compacting context{ELLIPSIS}")),
            WireEvent::CompactionEnd => self.log("Context compacted".to_string()),
            WireEvent::StatusUpdate { context_usage } => {
                if let Some(usage) = context_usage {
                    self.log(format!("context usage {:.1}%", usage * 100.0));
                }
            }
            WireEvent::ToolCall { id, name, .. } => {
                self.log(format!("calling tool {name}"));
                self.tool_names.insert(id, name);
            }
            // Streaming arguments carry nothing worth logging.
            WireEvent::ToolCallDelta { .. } => {}
            WireEvent::ToolResult {
                tool_call_id,
                outcome,
            } => {
                let name = self
                    .tool_names
                    .get(&tool_call_id)
                    .cloned()
                    .unwrap_or(tool_call_id);
                let brief = if outcome.brief.trim().is_empty() {
                    outcome.message.trim()
                } else {
                    outcome.brief.trim()
                };
                let verdict = if outcome.ok { "succeeded" } else { "failed" };
                let mut line = format!("tool {name} {verdict}");
                if !brief.is_empty() {
                    line.push_str(": ");
                    line.push_str(&shorten(brief, 80, 77));
                }
                self.log(line);
                if name == SHELL_TOOL_NAME {
                    self.log_bash_transcript(&outcome.output);
                }
            }
            WireEvent::ApprovalRequest(request) => {
                self.store.mark_waiting_approval(self.task_id, request);
            }
            // Subagent chatter is noise at this level.
            WireEvent::Subagent { .. } => {}
            WireEvent::Other { kind, .. } => self.log(format!("received event {kind}")),
        }
    }

    pub(crate) fn flush(&mut self) {
        self.flush_text();
        self.flush_thinking();
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        if !text.trim().is_empty() {
            self.log(text);
        }
    }

    fn flush_thinking(&mut self) {
        let thinking = std::mem::take(&mut self.thinking);
        let thinking = thinking.trim();
        if !thinking.is_empty() {
            self.log(format!("[thinking] {}", shorten(thinking, 100, 97)));
        }
    }

    fn log_bash_transcript(&self, transcript: &str) {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        let lines: Vec<&str> = transcript.lines().collect();
        for line in lines.iter().take(MAX_BASH_TRANSCRIPT_LINES) {
            self.store.append_log(self.task_id, *line);
        }
        if lines.len() > MAX_BASH_TRANSCRIPT_LINES {
            self.store.append_log(
                self.task_id,
                format!("{ELLIPSIS} +{} lines", lines.len() - MAX_BASH_TRANSCRIPT_LINES),
            );
        }
    }

    fn log(&self, line: String) {
        self.store.append_log(self.task_id, line);
    }
}
