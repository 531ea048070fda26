//! Non-interactive run front end.
//!
//! A run is one task driven to completion through a [`TaskManager`]. Its
//! progress is published as [`RunRecord`]s, which the CLI prints as NDJSON,
//! or buffered into a [`BatchDocument`] together with a derived
//! conversation.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::runtime::approvals::ApprovalResponse;
use crate::runtime::{
    now_unix_millis, ApprovalSnapshot, TaskEvent, TaskManager, TaskStatus, WireEvent,
};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One NDJSON line of a run stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    /// Unix milliseconds.
    pub timestamp: u64,
}

impl RunRecord {
    pub fn new(run_id: &str, kind: &str, payload: Value, timestamp: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            kind: kind.to_string(),
            payload,
            timestamp,
        }
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            json!({ "run_id": self.run_id, "type": "error", "payload": { "message": e.to_string() } })
                .to_string()
        });
        line.push('\n');
        line
    }
}

/// Write one record to `out` as a single NDJSON line.
pub fn write_ndjson<W: Write>(out: &mut W, record: &RunRecord) -> io::Result<()> {
    out.write_all(record.to_ndjson().as_bytes())?;
    out.flush()
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Finished,
    Failed,
    Cancelled,
    MaxStepsReached,
}

impl RunStatus {
    fn from_task(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Succeeded => Self::Finished,
            TaskStatus::Cancelled => Self::Cancelled,
            TaskStatus::MaxStepsReached => Self::MaxStepsReached,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Buffered result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDocument {
    pub run_id: String,
    pub status: RunStatus,
    pub events: Vec<RunRecord>,
    pub conversation: Vec<ConversationTurn>,
}

/// Rebuild the user/assistant exchange from a run's records.
///
/// Assistant text is the concatenation of every `text_delta` wire event.
pub fn derive_conversation(input: &str, records: &[RunRecord]) -> Vec<ConversationTurn> {
    let mut conversation = vec![ConversationTurn {
        role: Role::User,
        content: input.to_string(),
    }];
    let assistant: String = records
        .iter()
        .filter(|record| record.kind == "wire_event")
        .filter(|record| record.payload["type"] == "text_delta")
        .filter_map(|record| record.payload["payload"]["text"].as_str())
        .collect();
    if !assistant.is_empty() {
        conversation.push(ConversationTurn {
            role: Role::Assistant,
            content: assistant,
        });
    }
    conversation
}

/// Random run identifier, e.g. `run-3f9a0c2e51d4b7a8`.
pub fn new_run_id() -> String {
    format!("run-{:016x}", rand::random::<u64>())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Live runs by id, for cancellation.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, u64>>>,
}

impl RunRegistry {
    pub fn register(&self, run_id: &str, task_id: u64) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(run_id.to_string(), task_id);
        }
    }

    pub fn task_for(&self, run_id: &str) -> Option<u64> {
        self.runs.lock().ok().and_then(|runs| runs.get(run_id).copied())
    }

    pub fn remove(&self, run_id: &str) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.remove(run_id);
        }
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Drives runs through a task manager and publishes their records.
pub struct RunExecutor {
    manager: Arc<TaskManager>,
    registry: RunRegistry,
    /// Answer given to approval requests, since nobody is there to ask.
    approval_answer: ApprovalResponse,
}

impl RunExecutor {
    pub fn new(manager: Arc<TaskManager>, auto_approve: bool) -> Self {
        Self {
            manager,
            registry: RunRegistry::default(),
            approval_answer: if auto_approve {
                ApprovalResponse::Approve
            } else {
                ApprovalResponse::Reject
            },
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Request cancellation of a live run. False for unknown ids.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.registry.task_for(run_id) {
            Some(task_id) => {
                self.manager.cancel(task_id);
                true
            }
            None => false,
        }
    }

    /// Run `command` to completion, sending every record to `out`.
    pub async fn execute(
        &self,
        run_id: &str,
        command: &str,
        out: &mpsc::UnboundedSender<RunRecord>,
    ) -> RunStatus {
        let publish = |kind: &str, payload: Value, timestamp: u64| {
            // A closed receiver just means nobody is listening any more.
            let _ = out.send(RunRecord::new(run_id, kind, payload, timestamp));
        };

        let mut events = self.manager.subscribe();
        let task = self.manager.submit(command, command.into(), false);
        self.registry.register(run_id, task.id);
        info!(run_id, task_id = task.id, "run started");
        publish(
            "run_started",
            json!({ "task_id": task.id, "command": command }),
            now_unix_millis(),
        );
        publish("turn_started", json!({ "input": command }), now_unix_millis());

        let complete = |status: TaskStatus, summary: &str, steps: u32, ts: u64| {
            let run_status = RunStatus::from_task(status);
            if run_status == RunStatus::Failed {
                publish("error", json!({ "message": summary }), ts);
            }
            publish("turn_completed", json!({ "status": run_status }), ts);
            let mut payload = json!({ "status": run_status });
            if run_status == RunStatus::MaxStepsReached {
                payload["steps"] = json!(steps);
            }
            publish("run_completed", payload, ts);
            run_status
        };
        let answer = |approval: &ApprovalSnapshot, answered: &mut HashSet<String>, ts: u64| {
            if !answered.insert(approval.id.clone()) {
                return;
            }
            publish(
                "approval_request",
                serde_json::to_value(approval).unwrap_or(Value::Null),
                ts,
            );
            self.manager.resolve_approval(&approval.id, self.approval_answer);
        };

        let mut steps: u32 = 0;
        let mut answered: HashSet<String> = HashSet::new();
        let status = loop {
            let envelope = match events.recv().await {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(run_id, missed, "run stream lagged behind task events");
                    // Missed events; catch up from the store.
                    for approval in self.manager.list_approvals() {
                        if approval.task_id == task.id {
                            answer(&approval, &mut answered, now_unix_millis());
                        }
                    }
                    match self.manager.get(task.id) {
                        Some(current) if current.status.is_terminal() => {
                            let ts = current.finished_at_ms.unwrap_or_else(now_unix_millis);
                            let summary = current.summary.unwrap_or_default();
                            break complete(current.status, &summary, steps, ts);
                        }
                        Some(_) => continue,
                        None => break RunStatus::Failed,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break RunStatus::Failed,
            };
            if envelope.event.task_id() != task.id {
                continue;
            }
            let ts = envelope.ts_unix_ms;
            match envelope.event {
                // Surfaced through `ApprovalRequested` instead.
                TaskEvent::Wire {
                    event: WireEvent::ApprovalRequest(_),
                    ..
                } => {}
                TaskEvent::Wire { event, .. } => {
                    if let WireEvent::StepBegin { n } = event {
                        steps = steps.max(n);
                    }
                    let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
                    publish("wire_event", payload, ts);
                }
                TaskEvent::ApprovalRequested { approval, .. } => {
                    answer(&approval, &mut answered, ts);
                }
                TaskEvent::ApprovalResolved {
                    approval_id,
                    response,
                    ..
                } => {
                    publish(
                        "approval_response",
                        json!({ "id": approval_id, "decision": response }),
                        ts,
                    );
                }
                TaskEvent::Finished {
                    status, summary, ..
                } => break complete(status, &summary, steps, ts),
                TaskEvent::Queued { .. } | TaskEvent::StatusChanged { .. } | TaskEvent::Log { .. } => {}
            }
        };

        self.registry.remove(run_id);
        info!(run_id, status = ?status, "run completed");
        status
    }

    /// Run `command` and return the whole record sequence as one document.
    pub async fn execute_batch(&self, command: &str) -> BatchDocument {
        let run_id = new_run_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let status = self.execute(&run_id, command, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(record) = rx.recv().await {
            events.push(record);
        }
        let conversation = derive_conversation(command, &events);
        BatchDocument {
            run_id,
            status,
            events,
            conversation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::approvals::ApprovalPolicy;
    use crate::runtime::TaskStore;
    use crate::testsupport::{ScriptStep, ScriptedRuntime};
    use tokio::time::{timeout, Duration};

    fn executor(runtime: ScriptedRuntime, auto_approve: bool) -> RunExecutor {
        let manager = TaskManager::new(TaskStore::new(), Arc::new(runtime), ApprovalPolicy::default());
        RunExecutor::new(Arc::new(manager), auto_approve)
    }

    fn kinds(records: &[RunRecord]) -> Vec<&str> {
        records.iter().map(|r| r.kind.as_str()).collect()
    }

    #[tokio::test]
    async fn batch_document_has_lifecycle_and_conversation() {
        let runtime = ScriptedRuntime::new().on(
            "hi",
            vec![
                ScriptStep::Event(WireEvent::StepBegin { n: 1 }),
                ScriptStep::Text("Hello".into()),
                ScriptStep::Text(" there".into()),
            ],
        );
        let doc = timeout(Duration::from_secs(5), executor(runtime, true).execute_batch("hi"))
            .await
            .unwrap();
        assert_eq!(doc.status, RunStatus::Finished);
        assert_eq!(
            kinds(&doc.events),
            vec![
                "run_started",
                "turn_started",
                "wire_event",
                "wire_event",
                "wire_event",
                "turn_completed",
                "run_completed",
            ]
        );
        assert!(doc.events.iter().all(|r| r.run_id == doc.run_id));
        assert_eq!(
            doc.conversation,
            vec![
                ConversationTurn { role: Role::User, content: "hi".into() },
                ConversationTurn { role: Role::Assistant, content: "Hello there".into() },
            ]
        );
    }

    #[tokio::test]
    async fn approvals_are_answered_automatically() {
        let runtime = ScriptedRuntime::new().on("ask", vec![ScriptStep::Approval("deploy")]);
        let recorder = runtime.clone();
        let doc = timeout(Duration::from_secs(5), executor(runtime, true).execute_batch("ask"))
            .await
            .unwrap();
        let response = doc
            .events
            .iter()
            .find(|r| r.kind == "approval_response")
            .expect("approval response record");
        assert_eq!(response.payload["decision"], "approve");
        assert_eq!(recorder.responses(), vec![ApprovalResponse::Approve]);
    }

    #[tokio::test]
    async fn max_steps_reports_step_count() {
        let runtime = ScriptedRuntime::new().on(
            "loop",
            vec![
                ScriptStep::Event(WireEvent::StepBegin { n: 1 }),
                ScriptStep::Event(WireEvent::StepBegin { n: 2 }),
                ScriptStep::Fail(crate::error::RunError::MaxStepsReached { steps: 2 }),
            ],
        );
        let doc = timeout(Duration::from_secs(5), executor(runtime, false).execute_batch("loop"))
            .await
            .unwrap();
        assert_eq!(doc.status, RunStatus::MaxStepsReached);
        let last = doc.events.last().unwrap();
        assert_eq!(last.kind, "run_completed");
        assert_eq!(last.payload, json!({ "status": "max_steps_reached", "steps": 2 }));
    }

    #[tokio::test]
    async fn failures_emit_an_error_record() {
        let runtime = ScriptedRuntime::new().on(
            "bad",
            vec![ScriptStep::Fail(crate::error::RunError::LlmNotConfigured)],
        );
        let doc = timeout(Duration::from_secs(5), executor(runtime, false).execute_batch("bad"))
            .await
            .unwrap();
        assert_eq!(doc.status, RunStatus::Failed);
        let error = doc.events.iter().find(|r| r.kind == "error").unwrap();
        assert_eq!(
            error.payload["message"],
            "task #1 failed: LLM not configured, use /setup"
        );
        assert_eq!(doc.conversation.len(), 1);
    }

    #[tokio::test]
    async fn live_runs_can_be_cancelled() {
        let runtime = ScriptedRuntime::new().on("wait", vec![ScriptStep::WaitForCancel]);
        let executor = Arc::new(executor(runtime, false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute("run-test", "wait", &tx).await })
        };
        // Wait for the run to register before cancelling it.
        let started = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(started.kind, "run_started");
        assert!(executor.cancel("run-test"));
        let status = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert_eq!(status, RunStatus::Cancelled);
        assert!(executor.registry().is_empty());
        assert!(!executor.cancel("run-test"));
    }

    #[test]
    fn written_stream_has_one_line_per_record() {
        let mut out = Vec::new();
        for kind in ["run_started", "wire_event", "run_completed"] {
            let record = RunRecord::new("run-1", kind, json!({}), 1);
            write_ndjson(&mut out, &record).unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| !line.trim().is_empty()));
        assert!(!text.contains("\n\n"));
    }

    #[tokio::test]
    async fn lagging_run_stream_catches_up_from_the_store() {
        let chatter: Vec<ScriptStep> = (1..=700)
            .map(|n| ScriptStep::Event(WireEvent::StepBegin { n }))
            .collect();
        let runtime = ScriptedRuntime::new().on("noisy", chatter);
        let manager = Arc::new(TaskManager::new(
            TaskStore::new(),
            Arc::new(runtime),
            ApprovalPolicy::default(),
        ));
        let executor = RunExecutor::new(Arc::clone(&manager), false);
        let (tx, _rx) = mpsc::unbounded_channel();

        let run = executor.execute("run-a", "quiet", &tx);
        tokio::pin!(run);
        // Poll once to subscribe and submit, then flood the event stream
        // while the run is not being polled.
        tokio::select! {
            biased;
            _ = &mut run => panic!("run finished before its task started"),
            _ = std::future::ready(()) => {}
        }
        let quiet = manager.wait_finished(1).await.unwrap();
        assert_eq!(quiet.status, TaskStatus::Succeeded);
        let noisy = manager.submit("noisy", "noisy".into(), false);
        manager.wait_finished(noisy.id).await.unwrap();

        let status = timeout(Duration::from_secs(5), run)
            .await
            .expect("run for a finished task should complete");
        assert_eq!(status, RunStatus::Finished);
        manager.shutdown().await;
    }

    #[test]
    fn records_serialize_as_single_lines() {
        let record = RunRecord::new("run-1", "run_completed", json!({"status": "finished"}), 5);
        let line = record.to_ndjson();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["type"], "run_completed");
        assert_eq!(parsed["timestamp"], 5);
    }
}
