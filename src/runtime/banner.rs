//! Plain-text task banner rows.
//!
//! Active tasks come first (most recently active on top), followed by
//! finished tasks that are still inside their fade window.

use super::schema::{TaskSnapshot, TaskStatus};
use crate::textutil::shorten;

const COMMAND_WIDTH: usize = 40;

/// Render at most `visible_slots` task rows, plus a `+N more` row when
/// tasks were left out. Returns no rows when nothing is worth showing.
pub fn render_banner(tasks: &[TaskSnapshot], visible_slots: usize, now_ms: u64) -> Vec<String> {
    let (shown, hidden) = visible_tasks(tasks, visible_slots, now_ms);
    let mut rows: Vec<String> = shown
        .into_iter()
        .map(|task| render_task_row(task, now_ms))
        .collect();
    if hidden > 0 {
        rows.push(format!("+{hidden} more (use /tasks)"));
    }
    rows
}

/// What the banner shows, minus the elapsed column. Two banners with equal
/// signatures differ only in how much time has passed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannerSignature {
    rows: Vec<(u64, TaskStatus)>,
    hidden: usize,
}

pub fn banner_signature(tasks: &[TaskSnapshot], visible_slots: usize, now_ms: u64) -> BannerSignature {
    let (shown, hidden) = visible_tasks(tasks, visible_slots, now_ms);
    BannerSignature {
        rows: shown.into_iter().map(|task| (task.id, task.status)).collect(),
        hidden,
    }
}

fn visible_tasks(
    tasks: &[TaskSnapshot],
    visible_slots: usize,
    now_ms: u64,
) -> (Vec<&TaskSnapshot>, usize) {
    let mut active: Vec<&TaskSnapshot> = Vec::new();
    let mut fading: Vec<&TaskSnapshot> = Vec::new();
    for task in tasks {
        if !task.status.is_terminal() {
            active.push(task);
        } else if task.fade_deadline_ms.is_some_and(|deadline| now_ms < deadline) {
            fading.push(task);
        }
    }
    active.sort_by(|a, b| b.last_active_ms.cmp(&a.last_active_ms));
    fading.sort_by(|a, b| b.finished_at_ms.cmp(&a.finished_at_ms));

    let slots = visible_slots.max(1);
    let total = active.len() + fading.len();
    let shown = active.into_iter().chain(fading).take(slots).collect();
    (shown, total.saturating_sub(slots))
}

/// One `#ID Label ELAPSED command` row with an optional action hint.
pub fn render_task_row(task: &TaskSnapshot, now_ms: u64) -> String {
    let command = shorten(&task.command, COMMAND_WIDTH, COMMAND_WIDTH - 1);
    let mut row = format!(
        "#{} {} {} {}",
        task.id,
        task.status.label(),
        format_elapsed(task, now_ms),
        command
    );
    if let Some(hint) = status_hint(task) {
        row.push_str(&format!("  ({hint})"));
    }
    row
}

fn status_hint(task: &TaskSnapshot) -> Option<String> {
    match task.status {
        TaskStatus::WaitingApproval => Some("/approvals".to_string()),
        TaskStatus::Queued => Some(format!("/cancel {}", task.id)),
        TaskStatus::Failed => Some("check logs".to_string()),
        _ => None,
    }
}

fn format_elapsed(task: &TaskSnapshot, now_ms: u64) -> String {
    let start = task.started_at_ms.unwrap_or(task.created_at_ms);
    let end = task.finished_at_ms.unwrap_or(now_ms);
    format_elapsed_secs(end.saturating_sub(start) / 1000)
}

/// `42s`, `3m 07s`, `2h 5m`, `1d 3h`.
pub fn format_elapsed_secs(secs: u64) -> String {
    if secs < 60 {
        return format!("{secs}s");
    }
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes < 60 {
        return format!("{minutes}m {seconds:02}s");
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours < 24 {
        return format!("{hours}h {minutes}m");
    }
    format!("{}d {}h", hours / 24, hours % 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, status: TaskStatus, last_active_ms: u64) -> TaskSnapshot {
        let finished = status.is_terminal().then_some(last_active_ms);
        TaskSnapshot {
            id,
            command: format!("cmd {id}"),
            thinking: false,
            status,
            created_at_ms: 0,
            started_at_ms: Some(0),
            finished_at_ms: finished,
            last_active_ms,
            fade_deadline_ms: finished.map(|f| f + 3_000),
            logs: Vec::new(),
            pending_approvals: Vec::new(),
            summary: None,
        }
    }

    #[test]
    fn elapsed_formats_by_magnitude() {
        assert_eq!(format_elapsed_secs(42), "42s");
        assert_eq!(format_elapsed_secs(187), "3m 07s");
        assert_eq!(format_elapsed_secs(2 * 3600 + 5 * 60 + 9), "2h 5m");
        assert_eq!(format_elapsed_secs(27 * 3600), "1d 3h");
    }

    #[test]
    fn active_tasks_precede_fading_ones() {
        let tasks = vec![
            task(1, TaskStatus::Succeeded, 9_000),
            task(2, TaskStatus::Running, 5_000),
            task(3, TaskStatus::Queued, 7_000),
        ];
        let rows = render_banner(&tasks, 4, 10_000);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("#3 Queued"));
        assert!(rows[0].ends_with("(/cancel 3)"));
        assert!(rows[1].starts_with("#2 Working 10s cmd 2"));
        assert!(rows[2].starts_with("#1 Done 9s"));
    }

    #[test]
    fn faded_tasks_disappear_and_overflow_is_counted() {
        let tasks = vec![
            task(1, TaskStatus::Failed, 1_000),
            task(2, TaskStatus::Running, 5_000),
            task(3, TaskStatus::WaitingApproval, 6_000),
            task(4, TaskStatus::Cancelling, 7_000),
        ];
        let rows = render_banner(&tasks, 2, 10_000);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("#4 Cancelling"));
        assert!(rows[1].starts_with("#3 Waiting approval"));
        assert_eq!(rows[2], "+1 more (use /tasks)");
        assert!(render_banner(&tasks[..1], 2, 10_000).is_empty());
    }

    #[test]
    fn signature_ignores_elapsed_time_and_command_text() {
        let mut running = task(1, TaskStatus::Running, 5_000);
        running.command = "sleep 2m; echo 5s 10h".to_string();
        let tasks = vec![running];
        let early = banner_signature(&tasks, 4, 6_000);
        let later = banner_signature(&tasks, 4, 125_000);
        assert_ne!(render_banner(&tasks, 4, 6_000), render_banner(&tasks, 4, 125_000));
        assert_eq!(early, later);
        assert_ne!(early, BannerSignature::default());

        let mut waiting = tasks.clone();
        waiting[0].status = TaskStatus::WaitingApproval;
        assert_ne!(banner_signature(&waiting, 4, 125_000), later);
    }

    #[test]
    fn signature_tracks_overflow_and_fade_out() {
        let tasks = vec![
            task(1, TaskStatus::Succeeded, 9_000),
            task(2, TaskStatus::Running, 5_000),
            task(3, TaskStatus::Queued, 7_000),
        ];
        assert_ne!(banner_signature(&tasks, 3, 10_000), banner_signature(&tasks, 2, 10_000));
        assert_ne!(banner_signature(&tasks, 3, 10_000), banner_signature(&tasks, 3, 12_500));
        assert_eq!(banner_signature(&tasks[..1], 3, 12_500), BannerSignature::default());
        assert_eq!(banner_signature(&[], 3, 0), BannerSignature::default());
    }
}
