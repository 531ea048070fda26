//! Approval gate: a single-resolution handshake between a suspended tool
//! call and whoever answers it.
//!
//! The runtime side calls [`ApprovalGate::request`], which publishes a
//! [`WireEvent::ApprovalRequest`] and waits. The task store registers the
//! request and later resolves it exactly once.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::debug;

use super::schema::{ApprovalSnapshot, WireEvent};
use super::{CancelSignal, EventSink};

/// Answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalResponse {
    Approve,
    /// Approve this request and every later one with the same action.
    ApproveForSession,
    Reject,
}

impl ApprovalResponse {
    pub fn is_approved(self) -> bool {
        !matches!(self, Self::Reject)
    }

    /// Past-tense verb used in logs and confirmations.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Approve => "Approved",
            Self::ApproveForSession => "Approved for this session",
            Self::Reject => "Rejected",
        }
    }
}

impl fmt::Display for ApprovalResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::ApproveForSession => "approve-for-session",
            Self::Reject => "reject",
        })
    }
}

impl FromStr for ApprovalResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "yes" | "y" => Ok(Self::Approve),
            "approve-for-session" | "approve-session" | "session" => Ok(Self::ApproveForSession),
            "reject" | "deny" | "no" | "n" => Ok(Self::Reject),
            other => Err(format!("unknown approval response `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A pending approval with a write-once resolution slot.
///
/// Clones share the slot; the first [`ApprovalRequest::resolve`] wins.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub task_id: u64,
    /// Name of the requesting actor, e.g. a tool name.
    pub sender: String,
    /// One-line imperative, e.g. `run shell command`.
    pub action: String,
    pub description: String,
    #[serde(skip)]
    slot: Arc<Mutex<Option<oneshot::Sender<ApprovalResponse>>>>,
}

impl ApprovalRequest {
    pub fn new(
        id: impl Into<String>,
        task_id: u64,
        sender: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> (Self, oneshot::Receiver<ApprovalResponse>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id: id.into(),
            task_id,
            sender: sender.into(),
            action: action.into(),
            description: description.into(),
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (request, rx)
    }

    /// Resolve the request. Returns false if it was already resolved.
    pub fn resolve(&self, response: ApprovalResponse) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // The waiter may be gone already; the resolution still counts.
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    pub fn snapshot(&self) -> ApprovalSnapshot {
        ApprovalSnapshot {
            id: self.id.clone(),
            task_id: self.task_id,
            sender: self.sender.clone(),
            action: self.action.clone(),
            description: self.description.clone(),
        }
    }

    /// Prompt text listing the three possible answers.
    pub fn prompt(&self) -> String {
        format_approval_prompt(&self.snapshot())
    }
}

/// Render the approval prompt shown to a human.
pub fn format_approval_prompt(approval: &ApprovalSnapshot) -> String {
    let mut lines = vec![format!(
        "[{}] wants to {} (task #{})",
        approval.sender, approval.action, approval.task_id
    )];
    if !approval.description.trim().is_empty() {
        lines.push(format!("  {}", approval.description));
    }
    lines.push(format!("  /approve {}           approve this request", approval.id));
    lines.push(format!(
        "  /approve-session {}   approve this action for the session",
        approval.id
    ));
    lines.push(format!("  /reject {}            reject", approval.id));
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Policy and gate
// ---------------------------------------------------------------------------

/// Approval state shared by every task of one session.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    yolo: bool,
    session_actions: Arc<Mutex<HashSet<String>>>,
}

impl ApprovalPolicy {
    pub fn new(yolo: bool) -> Self {
        Self {
            yolo,
            session_actions: Arc::default(),
        }
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo
    }

    /// True when `action` needs no prompt.
    pub fn auto_approves(&self, action: &str) -> bool {
        self.yolo
            || self
                .session_actions
                .lock()
                .map(|actions| actions.contains(action))
                .unwrap_or(false)
    }

    pub fn approve_for_session(&self, action: &str) {
        if let Ok(mut actions) = self.session_actions.lock() {
            actions.insert(action.to_string());
        }
    }
}

/// Entry point tools use to ask a human for permission.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    task_id: u64,
    policy: ApprovalPolicy,
    events: Option<EventSink>,
    cancel: CancelSignal,
    next_nonce: Arc<AtomicU16>,
}

impl ApprovalGate {
    pub fn new(task_id: u64, policy: ApprovalPolicy, events: EventSink, cancel: CancelSignal) -> Self {
        Self {
            task_id,
            policy,
            events: Some(events),
            cancel,
            next_nonce: Arc::new(AtomicU16::new(rand::random())),
        }
    }

    /// Gate with nobody to ask: only the policy can approve.
    pub fn detached(policy: ApprovalPolicy) -> Self {
        Self {
            task_id: 0,
            policy,
            events: None,
            cancel: CancelSignal::new(),
            next_nonce: Arc::new(AtomicU16::new(0)),
        }
    }

    /// Ask for approval and wait for the answer.
    ///
    /// Cancellation, a closed event stream, or a dropped request all count as
    /// [`ApprovalResponse::Reject`].
    pub async fn request(&self, sender: &str, action: &str, description: &str) -> ApprovalResponse {
        if self.policy.auto_approves(action) {
            return ApprovalResponse::Approve;
        }
        let Some(events) = &self.events else {
            return ApprovalResponse::Reject;
        };
        if self.cancel.is_cancelled() {
            return ApprovalResponse::Reject;
        }

        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let id = format!("appr-{}-{:04x}", self.task_id, nonce);
        let (request, rx) = ApprovalRequest::new(id.clone(), self.task_id, sender, action, description);
        if !events.emit(WireEvent::ApprovalRequest(request)) {
            return ApprovalResponse::Reject;
        }
        debug!(task_id = self.task_id, approval_id = %id, action, "waiting for approval");

        let response = tokio::select! {
            response = rx => response.unwrap_or(ApprovalResponse::Reject),
            _ = self.cancel.cancelled() => ApprovalResponse::Reject,
        };
        if response == ApprovalResponse::ApproveForSession {
            self.policy.approve_for_session(action);
        }
        response
    }
}
