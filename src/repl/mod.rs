//! Interactive shell front end.
//!
//! Reads lines from stdin. Slash commands control tasks and approvals;
//! anything else is submitted as a new task. Store events are printed as
//! they arrive and the task banner is reprinted whenever its rows change.

pub mod commands;

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::Config;
use crate::runtime::approvals::format_approval_prompt;
use crate::runtime::banner::{banner_signature, render_banner, render_task_row, BannerSignature};
use crate::runtime::{
    now_unix_millis, ApprovalResponse, TaskEvent, TaskInput, TaskManager, TaskStatus,
};
use commands::{help_text, parse_slash_command, SlashCommandAction};

/// What the loop should do after one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Print(Vec<String>),
    Quit,
}

/// Apply one line of user input to the task manager.
pub fn handle_line(manager: &TaskManager, line: &str) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineOutcome::Print(Vec::new());
    }
    let Some(action) = parse_slash_command(trimmed) else {
        let task = manager.submit(trimmed, TaskInput::from(trimmed), false);
        debug!(task_id = task.id, "submitted from repl");
        return LineOutcome::Print(Vec::new());
    };

    let lines = match action {
        SlashCommandAction::Quit => return LineOutcome::Quit,
        SlashCommandAction::Help => vec![help_text()],
        SlashCommandAction::Tasks => list_tasks(manager),
        SlashCommandAction::Logs(arg) => match parse_task_id(arg.as_deref()) {
            Some(id) => match manager.get(id) {
                Some(task) if task.logs.is_empty() => vec![format!("Task #{id} has no logs.")],
                Some(task) => task.logs,
                None => vec!["Task not found.".to_string()],
            },
            None => vec!["Usage: /logs <id>".to_string()],
        },
        SlashCommandAction::Approvals => {
            let approvals = manager.list_approvals();
            if approvals.is_empty() {
                vec!["No pending approvals.".to_string()]
            } else {
                approvals.iter().map(format_approval_prompt).collect()
            }
        }
        SlashCommandAction::Approve(arg) => resolve(manager, arg, ApprovalResponse::Approve, "/approve"),
        SlashCommandAction::ApproveSession(arg) => resolve(
            manager,
            arg,
            ApprovalResponse::ApproveForSession,
            "/approve-session",
        ),
        SlashCommandAction::Reject(arg) => resolve(manager, arg, ApprovalResponse::Reject, "/reject"),
        SlashCommandAction::Cancel(arg) => match parse_task_id(arg.as_deref()) {
            Some(id) => vec![manager.cancel(id).message().to_string()],
            None => vec!["Usage: /cancel <id>".to_string()],
        },
        SlashCommandAction::Unknown(token) => {
            vec![format!("Unknown command `{token}`. Type /help for commands.")]
        }
    };
    LineOutcome::Print(lines)
}

fn parse_task_id(arg: Option<&str>) -> Option<u64> {
    arg.map(|raw| raw.trim_start_matches('#'))
        .and_then(|raw| raw.parse().ok())
}

fn resolve(
    manager: &TaskManager,
    arg: Option<String>,
    response: ApprovalResponse,
    usage: &str,
) -> Vec<String> {
    match arg {
        Some(id) => vec![manager.resolve_approval(&id, response).message().to_string()],
        None => vec![format!("Usage: {usage} <approval-id>")],
    }
}

fn list_tasks(manager: &TaskManager) -> Vec<String> {
    let tasks = manager.list_tasks();
    if tasks.is_empty() {
        return vec!["No tasks yet.".to_string()];
    }
    let now = now_unix_millis();
    tasks
        .iter()
        .map(|task| match &task.summary {
            Some(summary) if task.status == TaskStatus::Failed => {
                format!("{}  {summary}", render_task_row(task, now))
            }
            _ => render_task_row(task, now),
        })
        .collect()
}

/// Text printed for a store event, if any. Log lines already carry the
/// status transitions, so only logs and approval prompts are shown.
pub fn render_event(event: &TaskEvent) -> Option<String> {
    match event {
        TaskEvent::Log { task_id, line } => Some(format!("[#{task_id}] {line}")),
        TaskEvent::ApprovalRequested { prompt, .. } => Some(prompt.clone()),
        _ => None,
    }
}

/// Run the interactive loop until `/quit` or end of input. In-flight work
/// is cancelled on exit.
pub async fn run_repl(manager: Arc<TaskManager>, config: &Config) -> io::Result<()> {
    let banner = &config.shell.task_banner;
    let refresh = Duration::from_secs_f64(banner.refresh_interval_secs.max(0.1));
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut events = manager.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_banner = BannerSignature::default();

    println!("{} - type /help for commands", crate::build_info::startup_metadata_line());
    if manager.policy().is_yolo() {
        println!("yolo mode: every action is approved automatically");
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match handle_line(&manager, &line) {
                    LineOutcome::Quit => break,
                    LineOutcome::Print(output) => {
                        for text in output {
                            println!("{text}");
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Ok(envelope) => {
                    if let Some(text) = render_event(&envelope.event) {
                        println!("{text}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "repl fell behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let tasks = manager.list_tasks();
                let now = now_unix_millis();
                let signature = banner_signature(&tasks, banner.visible_slots, now);
                if signature != last_banner {
                    for row in render_banner(&tasks, banner.visible_slots, now) {
                        println!("  {row}");
                    }
                    last_banner = signature;
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
