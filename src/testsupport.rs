//! Shared test fixtures: a scripted agent runtime and fakes for the rewrite
//! engine's collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RunError;
use crate::runtime::approvals::{ApprovalGate, ApprovalResponse};
use crate::runtime::{AgentRuntime, TurnContext, WireEvent};
use crate::tools::rewrite::{GrepCompatibility, ProvisionError, SearchToolProvisioner};

// ---------------------------------------------------------------------------
// Scripted runtime
// ---------------------------------------------------------------------------

/// One scripted action of a fake turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    Thinking(String),
    Event(WireEvent),
    /// Ask the approval gate; a rejection caused by cancellation ends the
    /// turn as cancelled.
    Approval(&'static str),
    WaitForCancel,
    Sleep(Duration),
    Fail(RunError),
    Panic,
}

/// Runtime that plays a fixed script per input text and records what ran.
#[derive(Clone, Default)]
pub struct ScriptedRuntime {
    scripts: HashMap<String, Vec<ScriptStep>>,
    history: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<Vec<ApprovalResponse>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the turn for input `text`. Unscripted inputs succeed silently.
    pub fn on(mut self, text: &str, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(text.to_string(), steps);
        self
    }

    /// Inputs in the order their turns started.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Approval answers observed by scripted turns.
    pub fn responses(&self) -> Vec<ApprovalResponse> {
        self.responses.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Highest number of turns that ran at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn play(&self, turn: &TurnContext, steps: Vec<ScriptStep>) -> Result<(), RunError> {
        for step in steps {
            match step {
                ScriptStep::Text(text) => {
                    turn.events.emit(WireEvent::TextDelta { text });
                }
                ScriptStep::Thinking(text) => {
                    turn.events.emit(WireEvent::ThinkingDelta { text });
                }
                ScriptStep::Event(event) => {
                    turn.events.emit(event);
                }
                ScriptStep::Approval(action) => {
                    let response = turn
                        .approvals
                        .request("Script", action, "scripted approval")
                        .await;
                    if let Ok(mut responses) = self.responses.lock() {
                        responses.push(response);
                    }
                    if turn.cancel.is_cancelled() {
                        return Err(RunError::Cancelled);
                    }
                }
                ScriptStep::WaitForCancel => {
                    turn.cancel.cancelled().await;
                    return Err(RunError::Cancelled);
                }
                ScriptStep::Sleep(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = turn.cancel.cancelled() => return Err(RunError::Cancelled),
                    }
                }
                ScriptStep::Fail(err) => return Err(err),
                ScriptStep::Panic => panic!("scripted panic"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run_turn(&self, turn: TurnContext) -> Result<(), RunError> {
        let text = turn.input.as_text();
        if let Ok(mut history) = self.history.lock() {
            history.push(text.clone());
        }
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let steps = self.scripts.get(&text).cloned().unwrap_or_default();
        let result = self.play(&turn, steps).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Rewrite collaborators
// ---------------------------------------------------------------------------

/// Compatibility check with a fixed verdict.
#[derive(Debug, Clone)]
pub struct FakeGrepCompatibility {
    compatible: bool,
}

impl FakeGrepCompatibility {
    pub fn new(compatible: bool) -> Self {
        Self { compatible }
    }
}

#[async_trait]
impl GrepCompatibility for FakeGrepCompatibility {
    async fn is_compatible(&self, _command_name: &str) -> bool {
        self.compatible
    }
}

/// Provisioner with a fixed result that counts how often it was asked.
#[derive(Debug)]
pub struct FakeProvisioner {
    result: Result<String, ProvisionError>,
    calls: AtomicUsize,
}

impl FakeProvisioner {
    pub fn new(result: Result<String, ProvisionError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchToolProvisioner for FakeProvisioner {
    async fn ensure_available(&self, _approvals: &ApprovalGate) -> Result<String, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}
