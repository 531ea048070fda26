//! Task orchestration runtime.
//!
//! Event and status types live in `schema`, task state in `store`, and the
//! FIFO worker in `tasks`. This module defines the seam to agent runtimes:
//! the [`AgentRuntime`] trait plus the event sink and cancellation signal
//! every turn receives.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::RunError;

pub mod approvals;
pub mod banner;
mod observer;
pub mod schema;
pub mod shell;
pub mod store;
pub mod tasks;

pub use approvals::{ApprovalGate, ApprovalPolicy, ApprovalRequest, ApprovalResponse};
pub use schema::*;
pub use store::{CancelOutcome, ResolveOutcome, TaskStore};
pub use tasks::TaskManager;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared by a task and its runtime.
///
/// Clones observe the same flag. Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag and wake every waiter.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

/// Sending half of a turn's wire event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WireEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WireEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one event. Returns false once the observer has gone away.
    pub fn emit(&self, event: WireEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Agent runtime seam
// ---------------------------------------------------------------------------

/// Everything a runtime needs to execute one turn.
#[derive(Clone)]
pub struct TurnContext {
    pub task_id: u64,
    pub input: TaskInput,
    pub thinking: bool,
    pub events: EventSink,
    pub approvals: ApprovalGate,
    pub cancel: CancelSignal,
}

/// An agent that executes a user turn and streams [`WireEvent`]s.
///
/// Implementations must check [`TurnContext::cancel`] at their own
/// suspension points and return [`RunError::Cancelled`] when it is raised.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run_turn(&self, turn: TurnContext) -> Result<(), RunError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn cancelled_resolves_for_every_clone() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        assert!(!signal.is_cancelled());
        signal.cancel();
        timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_raised() {
        let signal = CancelSignal::new();
        signal.cancel();
        timeout(Duration::from_millis(200), signal.cancelled())
            .await
            .expect("already cancelled");
    }

    #[test]
    fn emit_fails_after_receiver_drops() {
        let (sink, rx) = EventSink::channel();
        assert!(sink.emit(WireEvent::StepInterrupted));
        drop(rx);
        assert!(!sink.emit(WireEvent::StepInterrupted));
    }
}
