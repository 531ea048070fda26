//! FIFO task orchestration.
//!
//! `submit` enqueues and returns immediately; one worker drains the queue
//! and runs at most one task at a time. Each run executes in its own tokio
//! task so a panicking runtime fails that task without taking the worker
//! down.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::approvals::{ApprovalGate, ApprovalPolicy, ApprovalResponse};
use super::observer::TaskObserver;
use super::schema::{ApprovalSnapshot, TaskEvent, TaskEventEnvelope, TaskInput, TaskSnapshot, TaskStatus};
use super::store::{CancelOutcome, ResolveOutcome, TaskLaunch, TaskStore};
use super::{AgentRuntime, CancelSignal, EventSink, TurnContext};
use crate::error::RunError;

const SHUTDOWN_REASON: &str = "shell exited";

/// Front door for submitting and controlling tasks.
pub struct TaskManager {
    store: TaskStore,
    policy: ApprovalPolicy,
    queue: mpsc::UnboundedSender<u64>,
    shutdown: CancelSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskManager {
    /// Create the manager and spawn its worker. Must be called inside a
    /// tokio runtime.
    pub fn new(store: TaskStore, runtime: Arc<dyn AgentRuntime>, policy: ApprovalPolicy) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shutdown = CancelSignal::new();
        let worker = tokio::spawn(worker_loop(
            store.clone(),
            runtime,
            policy.clone(),
            rx,
            shutdown.clone(),
        ));
        Self {
            store,
            policy,
            queue,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Create a task and queue it. Never waits for the worker.
    pub fn submit(&self, command: &str, input: TaskInput, thinking: bool) -> TaskSnapshot {
        let task = self.store.create_task(command, input, thinking);
        if self.queue.send(task.id).is_err() {
            warn!(task_id = task.id, "worker stopped; task will not run");
            self.store.mark_cancelled(task.id, SHUTDOWN_REASON);
        }
        task
    }

    pub fn cancel(&self, task_id: u64) -> CancelOutcome {
        let outcome = self.store.cancel(task_id);
        info!(task_id, outcome = ?outcome, "cancel requested");
        outcome
    }

    pub fn resolve_approval(&self, approval_id: &str, response: ApprovalResponse) -> ResolveOutcome {
        self.store.resolve_approval(approval_id, response)
    }

    pub fn get(&self, task_id: u64) -> Option<TaskSnapshot> {
        self.store.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.store.list_tasks()
    }

    pub fn list_approvals(&self) -> Vec<ApprovalSnapshot> {
        self.store.list_approvals()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEventEnvelope> {
        self.store.subscribe()
    }

    /// Wait until `task_id` reaches a terminal status.
    ///
    /// Returns `None` for unknown ids or if the store goes away.
    pub async fn wait_finished(&self, task_id: u64) -> Option<TaskSnapshot> {
        let mut events = self.store.subscribe();
        loop {
            let task = self.store.get(task_id)?;
            if task.status.is_terminal() {
                return Some(task);
            }
            loop {
                match events.recv().await {
                    Ok(envelope) => {
                        if let TaskEvent::Finished { task_id: id, .. } = envelope.event {
                            if id == task_id {
                                break;
                            }
                        }
                    }
                    // Missed events; re-read the store.
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Stop the worker. A task still in flight ends as cancelled.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for task in self.store.list_tasks() {
            if is_in_flight(task.status) {
                if let Some(signal) = self.store.cancel_signal(task.id) {
                    signal.cancel();
                }
                self.store
                    .drop_pending_approvals(task.id, ApprovalResponse::Reject);
                self.store.mark_cancelled(task.id, SHUTDOWN_REASON);
            }
        }
        let worker = self
            .worker
            .lock()
            .ok()
            .and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
        info!("task manager stopped");
    }
}

fn is_in_flight(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Running | TaskStatus::WaitingApproval | TaskStatus::Cancelling
    )
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker_loop(
    store: TaskStore,
    runtime: Arc<dyn AgentRuntime>,
    policy: ApprovalPolicy,
    mut queue: mpsc::UnboundedReceiver<u64>,
    shutdown: CancelSignal,
) {
    loop {
        let task_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(task_id) => task_id,
                None => break,
            },
        };
        let Some(launch) = store.begin(task_id) else {
            debug!(task_id, "skipping task that is no longer queued");
            continue;
        };
        run_task(&store, runtime.clone(), &policy, task_id, launch).await;
    }
    debug!("task worker exiting");
}

/// Aborts the wrapped task when dropped, so aborting the worker also stops
/// the run it is waiting on.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_task(
    store: &TaskStore,
    runtime: Arc<dyn AgentRuntime>,
    policy: &ApprovalPolicy,
    task_id: u64,
    launch: TaskLaunch,
) {
    let (events, rx) = EventSink::channel();
    let observer = tokio::spawn(TaskObserver::new(store.clone(), task_id).run(rx));
    let _observer_guard = AbortOnDrop(observer.abort_handle());

    let turn = TurnContext {
        task_id,
        input: launch.input,
        thinking: launch.thinking,
        approvals: ApprovalGate::new(task_id, policy.clone(), events.clone(), launch.cancel.clone()),
        events,
        cancel: launch.cancel,
    };
    let run = tokio::spawn(async move { runtime.run_turn(turn).await });
    let _run_guard = AbortOnDrop(run.abort_handle());

    let result = match run.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            warn!(task_id, "agent runtime panicked");
            Err(RunError::Other("runtime panicked".to_string()))
        }
        Err(_) => Err(RunError::Cancelled),
    };

    // Every sink is gone once the run ends; wait for the log to catch up
    // before the terminal transition.
    if let Err(err) = observer.await {
        warn!(task_id, error = %err, "task observer failed");
    }
    settle(store, task_id, result);
}

/// Map a run result onto the task's terminal status.
fn settle(store: &TaskStore, task_id: u64, result: Result<(), RunError>) {
    match result {
        Ok(()) => {
            store.mark_succeeded(task_id);
        }
        Err(RunError::LlmNotConfigured) => {
            store.mark_failed(task_id, "LLM not configured, use /setup");
        }
        Err(err @ RunError::CapabilityUnsupported(_)) => {
            store.mark_failed(task_id, &err.to_string());
        }
        Err(RunError::MaxStepsReached { steps }) => {
            store.mark_max_steps(task_id, steps);
        }
        Err(RunError::Cancelled) => {
            store.mark_cancelled(task_id, "user interrupted");
        }
        Err(RunError::Provider(message) | RunError::Other(message)) => {
            warn!(task_id, error = %message, "task failed");
            store.mark_failed(task_id, &format!("unknown error: {message}"));
        }
    }
}
