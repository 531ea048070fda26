//! Canonical task and approval state.
//!
//! Every mutation goes through one lock so multi-field invariants (status,
//! pending approvals, log ring) change together. Each mutation publishes
//! [`TaskEvent`]s on a broadcast channel; sequence numbers are assigned
//! under the same lock, so subscribers see events in mutation order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::approvals::{ApprovalRequest, ApprovalResponse};
use super::schema::{
    now_unix_millis, ApprovalSnapshot, TaskEvent, TaskEventEnvelope, TaskInput, TaskSnapshot,
    TaskStatus, WireEvent,
};
use super::CancelSignal;

/// Log lines kept per task; older lines are dropped.
pub const LOG_CAPACITY: usize = 20;
/// How long a finished task stays visible in the banner.
pub const FADE_AFTER_MS: u64 = 3_000;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of resolving an approval by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Carries the confirmation shown to the user.
    Resolved(String),
    NotFound,
}

impl ResolveOutcome {
    pub fn message(&self) -> &str {
        match self {
            Self::Resolved(message) => message,
            Self::NotFound => "No matching approval request.",
        }
    }
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    NotFound,
    AlreadyFinished,
    /// The task had not started; it is now cancelled.
    CancelledQueued,
    /// The task is running; its cancellation signal has been raised.
    Requested,
}

impl CancelOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Task not found.",
            Self::AlreadyFinished => "Task already finished.",
            Self::CancelledQueued => "Cancelled queued task.",
            Self::Requested => "Cancellation requested.",
        }
    }
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// What the worker needs to run a task it has just started.
#[derive(Debug, Clone)]
pub struct TaskLaunch {
    pub input: TaskInput,
    pub thinking: bool,
    pub cancel: CancelSignal,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct TaskRecord {
    id: u64,
    command: String,
    input: TaskInput,
    thinking: bool,
    status: TaskStatus,
    created_at_ms: u64,
    started_at_ms: Option<u64>,
    finished_at_ms: Option<u64>,
    last_active_ms: u64,
    fade_deadline_ms: Option<u64>,
    cancel: CancelSignal,
    logs: VecDeque<String>,
    pending_approvals: Vec<String>,
    summary: Option<String>,
}

impl TaskRecord {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            command: self.command.clone(),
            thinking: self.thinking,
            status: self.status,
            created_at_ms: self.created_at_ms,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            last_active_ms: self.last_active_ms,
            fade_deadline_ms: self.fade_deadline_ms,
            logs: self.logs.iter().cloned().collect(),
            pending_approvals: self.pending_approvals.clone(),
            summary: self.summary.clone(),
        }
    }
}

struct StoreInner {
    next_id: u64,
    next_seq: u64,
    tasks: Vec<TaskRecord>,
    /// Outstanding approvals in registration order.
    approvals: Vec<ApprovalRequest>,
    events: broadcast::Sender<TaskEventEnvelope>,
}

/// Shared, cloneable handle to the task state.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl TaskStore {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                next_id: 1,
                next_seq: 0,
                tasks: Vec::new(),
                approvals: Vec::new(),
                events,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic while holding the lock leaves the state consistent enough
        // to keep serving reads and terminal transitions.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to store events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEventEnvelope> {
        self.lock().events.subscribe()
    }

    // ----- creation and queries -----

    pub fn create_task(
        &self,
        command: impl Into<String>,
        input: TaskInput,
        thinking: bool,
    ) -> TaskSnapshot {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let command = command.into();
        let now = now_unix_millis();
        let queued_line = format!("Queued `{command}`");
        let record = TaskRecord {
            id,
            command: command.clone(),
            input,
            thinking,
            status: TaskStatus::Queued,
            created_at_ms: now,
            started_at_ms: None,
            finished_at_ms: None,
            last_active_ms: now,
            fade_deadline_ms: None,
            cancel: CancelSignal::new(),
            logs: VecDeque::from([queued_line.clone()]),
            pending_approvals: Vec::new(),
            summary: None,
        };
        let snapshot = record.snapshot();
        inner.tasks.push(record);
        info!(task_id = id, command = %command, "task queued");
        inner.publish(TaskEvent::Queued {
            task_id: id,
            command,
        });
        inner.publish(TaskEvent::Log {
            task_id: id,
            line: queued_line,
        });
        snapshot
    }

    pub fn get(&self, task_id: u64) -> Option<TaskSnapshot> {
        self.lock().task(task_id).map(TaskRecord::snapshot)
    }

    /// Every task, ordered by id.
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.lock().tasks.iter().map(TaskRecord::snapshot).collect()
    }

    /// Outstanding approvals in the order they were raised.
    pub fn list_approvals(&self) -> Vec<ApprovalSnapshot> {
        self.lock()
            .approvals
            .iter()
            .map(ApprovalRequest::snapshot)
            .collect()
    }

    /// The task's cancellation signal.
    pub fn cancel_signal(&self, task_id: u64) -> Option<CancelSignal> {
        self.lock().task(task_id).map(|task| task.cancel.clone())
    }

    // ----- lifecycle -----

    /// `Queued -> Running`. Returns false for any other starting state.
    pub fn mark_running(&self, task_id: u64) -> bool {
        self.begin(task_id).is_some()
    }

    /// Start a queued task and hand back what the worker needs to run it.
    pub fn begin(&self, task_id: u64) -> Option<TaskLaunch> {
        let mut inner = self.lock();
        let now = now_unix_millis();
        let task = inner.task_mut(task_id)?;
        if task.status != TaskStatus::Queued {
            return None;
        }
        task.status = TaskStatus::Running;
        task.started_at_ms = Some(now);
        task.last_active_ms = now;
        let launch = TaskLaunch {
            input: task.input.clone(),
            thinking: task.thinking,
            cancel: task.cancel.clone(),
        };
        info!(task_id, "task started");
        inner.publish(TaskEvent::StatusChanged {
            task_id,
            status: TaskStatus::Running,
        });
        inner.log(task_id, "Started".to_string());
        Some(launch)
    }

    pub fn mark_succeeded(&self, task_id: u64) -> bool {
        self.lock().finish(task_id, TaskStatus::Succeeded, None)
    }

    pub fn mark_failed(&self, task_id: u64, reason: &str) -> bool {
        self.lock().finish(task_id, TaskStatus::Failed, Some(reason))
    }

    pub fn mark_max_steps(&self, task_id: u64, steps: u32) -> bool {
        let detail = format!("max steps reached ({steps})");
        self.lock()
            .finish(task_id, TaskStatus::MaxStepsReached, Some(&detail))
    }

    pub fn mark_cancelled(&self, task_id: u64, reason: &str) -> bool {
        self.lock()
            .finish(task_id, TaskStatus::Cancelled, Some(reason))
    }

    /// Cancel a task: queued tasks end immediately, running ones move to
    /// `Cancelling` with their approvals rejected and their signal raised.
    pub fn cancel(&self, task_id: u64) -> CancelOutcome {
        let mut inner = self.lock();
        let Some(task) = inner.task(task_id) else {
            return CancelOutcome::NotFound;
        };
        if task.status.is_terminal() {
            return CancelOutcome::AlreadyFinished;
        }
        let cancel = task.cancel.clone();
        if task.status == TaskStatus::Queued {
            cancel.cancel();
            inner.drop_pending(task_id, ApprovalResponse::Reject);
            inner.finish(task_id, TaskStatus::Cancelled, Some("cancelled before start"));
            return CancelOutcome::CancelledQueued;
        }
        inner.set_cancelling(task_id);
        inner.drop_pending(task_id, ApprovalResponse::Reject);
        cancel.cancel();
        CancelOutcome::Requested
    }

    // ----- approvals -----

    /// Register an approval raised by a task.
    ///
    /// Requests for missing, cancelling or finished tasks are rejected on
    /// the spot so no caller is left waiting. Returns whether the request
    /// was registered.
    pub fn mark_waiting_approval(&self, task_id: u64, request: ApprovalRequest) -> bool {
        let mut inner = self.lock();
        let accepts = inner.task(task_id).is_some_and(|task| {
            matches!(task.status, TaskStatus::Running | TaskStatus::WaitingApproval)
        });
        let duplicate = inner.approvals.iter().any(|entry| entry.id == request.id);
        if !accepts || duplicate {
            debug!(task_id, approval_id = %request.id, "approval rejected on arrival");
            request.resolve(ApprovalResponse::Reject);
            return false;
        }

        let now = now_unix_millis();
        let mut status_changed = false;
        if let Some(task) = inner.task_mut(task_id) {
            task.pending_approvals.push(request.id.clone());
            task.last_active_ms = now;
            if task.status != TaskStatus::WaitingApproval {
                task.status = TaskStatus::WaitingApproval;
                status_changed = true;
            }
        }
        info!(task_id, approval_id = %request.id, action = %request.action, "waiting for approval");
        if status_changed {
            inner.publish(TaskEvent::StatusChanged {
                task_id,
                status: TaskStatus::WaitingApproval,
            });
        }
        inner.log(task_id, format!("Waiting for approval {}", request.id));
        inner.publish(TaskEvent::ApprovalRequested {
            approval: request.snapshot(),
            prompt: request.prompt(),
        });
        inner.approvals.push(request);
        true
    }

    /// Resolve an approval. The owning task returns to `Running` before the
    /// waiting caller is released.
    pub fn resolve_approval(&self, approval_id: &str, response: ApprovalResponse) -> ResolveOutcome {
        self.lock().resolve(approval_id, response)
    }

    /// Resolve every outstanding approval of a task with `response`.
    pub fn drop_pending_approvals(&self, task_id: u64, response: ApprovalResponse) -> usize {
        self.lock().drop_pending(task_id, response)
    }

    // ----- logs and wire events -----

    pub fn append_log(&self, task_id: u64, line: impl Into<String>) {
        self.lock().log(task_id, line.into());
    }

    /// Forward a raw runtime event to subscribers.
    pub fn publish_wire(&self, task_id: u64, event: WireEvent) {
        let mut inner = self.lock();
        if inner.task(task_id).is_none() {
            return;
        }
        inner.publish(TaskEvent::Wire { task_id, event });
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreInner {
    fn task(&self, task_id: u64) -> Option<&TaskRecord> {
        // Ids are assigned in increasing order, so the vector stays sorted.
        self.tasks
            .binary_search_by_key(&task_id, |task| task.id)
            .ok()
            .map(|index| &self.tasks[index])
    }

    fn task_mut(&mut self, task_id: u64) -> Option<&mut TaskRecord> {
        match self.tasks.binary_search_by_key(&task_id, |task| task.id) {
            Ok(index) => Some(&mut self.tasks[index]),
            Err(_) => None,
        }
    }

    fn publish(&mut self, event: TaskEvent) {
        let envelope = TaskEventEnvelope {
            seq: self.next_seq,
            ts_unix_ms: now_unix_millis(),
            event,
        };
        self.next_seq += 1;
        // No subscribers is fine.
        let _ = self.events.send(envelope);
    }

    fn log(&mut self, task_id: u64, line: String) {
        let Some(task) = self.task_mut(task_id) else {
            return;
        };
        if task.logs.len() == LOG_CAPACITY {
            task.logs.pop_front();
        }
        task.logs.push_back(line.clone());
        task.last_active_ms = now_unix_millis();
        self.publish(TaskEvent::Log { task_id, line });
    }

    fn set_cancelling(&mut self, task_id: u64) -> bool {
        let now = now_unix_millis();
        let Some(task) = self.task_mut(task_id) else {
            return false;
        };
        if task.status.is_terminal() || task.status == TaskStatus::Cancelling {
            return false;
        }
        task.status = TaskStatus::Cancelling;
        task.last_active_ms = now;
        info!(task_id, "task cancelling");
        self.publish(TaskEvent::StatusChanged {
            task_id,
            status: TaskStatus::Cancelling,
        });
        self.log(task_id, "Cancelling".to_string());
        true
    }

    /// First terminal transition wins; later ones return false.
    fn finish(&mut self, task_id: u64, status: TaskStatus, detail: Option<&str>) -> bool {
        let now = now_unix_millis();
        let Some(task) = self.task_mut(task_id) else {
            return false;
        };
        if task.status.is_terminal() {
            debug!(task_id, current = %task.status, requested = %status, "ignoring late terminal transition");
            return false;
        }
        let summary = task_summary(task_id, status, detail);
        task.status = status;
        task.finished_at_ms = Some(now);
        task.last_active_ms = now;
        task.fade_deadline_ms = Some(now + FADE_AFTER_MS);
        task.summary = Some(summary.clone());
        info!(task_id, status = %status, "task finished");

        self.drop_pending(task_id, ApprovalResponse::Reject);
        self.publish(TaskEvent::StatusChanged { task_id, status });
        self.log(task_id, finish_log_line(status, detail));
        self.publish(TaskEvent::Finished {
            task_id,
            status,
            summary,
        });
        true
    }

    fn resolve(&mut self, approval_id: &str, response: ApprovalResponse) -> ResolveOutcome {
        let Some(index) = self.approvals.iter().position(|entry| entry.id == approval_id) else {
            return ResolveOutcome::NotFound;
        };
        let request = self.approvals.remove(index);
        let task_id = request.task_id;
        let now = now_unix_millis();
        let mut resumed = false;
        if let Some(task) = self.task_mut(task_id) {
            task.pending_approvals.retain(|id| id != approval_id);
            task.last_active_ms = now;
            if task.pending_approvals.is_empty() && task.status == TaskStatus::WaitingApproval {
                task.status = TaskStatus::Running;
                resumed = true;
            }
        }
        if resumed {
            self.publish(TaskEvent::StatusChanged {
                task_id,
                status: TaskStatus::Running,
            });
        }
        // Release the waiter only after the task is back to running.
        request.resolve(response);
        info!(task_id, approval_id, response = %response, "approval resolved");
        self.log(task_id, format!("{} approval {approval_id}", response.verb()));
        self.publish(TaskEvent::ApprovalResolved {
            task_id,
            approval_id: approval_id.to_string(),
            response,
        });
        ResolveOutcome::Resolved(format!("{}.", response.verb()))
    }

    fn drop_pending(&mut self, task_id: u64, response: ApprovalResponse) -> usize {
        let pending = match self.task(task_id) {
            Some(task) => task.pending_approvals.clone(),
            None => return 0,
        };
        let mut resolved = 0;
        for approval_id in &pending {
            if let ResolveOutcome::Resolved(_) = self.resolve(approval_id, response) {
                resolved += 1;
            }
        }
        resolved
    }
}

fn task_summary(task_id: u64, status: TaskStatus, detail: Option<&str>) -> String {
    match (status, detail) {
        (TaskStatus::Succeeded, _) => format!("task #{task_id} succeeded"),
        (TaskStatus::Failed, Some(reason)) => format!("task #{task_id} failed: {reason}"),
        (TaskStatus::Cancelled, Some(reason)) => format!("task #{task_id} cancelled: {reason}"),
        (TaskStatus::MaxStepsReached, Some(detail)) => format!("task #{task_id} stopped: {detail}"),
        (status, _) => format!("task #{task_id} {status}"),
    }
}

fn finish_log_line(status: TaskStatus, detail: Option<&str>) -> String {
    match (status, detail) {
        (TaskStatus::Succeeded, _) => "Done".to_string(),
        (TaskStatus::Failed, Some(reason)) => format!("Failed: {reason}"),
        (TaskStatus::Cancelled, Some(reason)) => format!("Cancelled: {reason}"),
        (TaskStatus::MaxStepsReached, Some(detail)) => format!("Stopped: {detail}"),
        (status, _) => status.label().to_string(),
    }
}
