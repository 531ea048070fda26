//! Bounded capture of subprocess output and transcript rendering.
//!
//! The collector keeps at most [`PREVIEW_LINE_LIMIT`] lines; everything past
//! that is only counted. Individual lines are cut at [`MAX_LINE_LENGTH`]
//! characters and end with [`TRUNCATE_MARKER`].

use crate::textutil::{truncate_with_suffix_by_chars, ELLIPSIS};

use super::execution::ExitState;

/// Preview lines kept per command.
pub const PREVIEW_LINE_LIMIT: usize = 20;
/// Longest line kept verbatim, marker included.
pub const MAX_LINE_LENGTH: usize = 2000;
/// Suffix marking a cut line.
pub const TRUNCATE_MARKER: &str = "[...truncated]";

/// Accumulates decoded output lines for one subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandOutputCollector {
    preview_limit: usize,
    max_line_length: usize,
    preview_lines: Vec<String>,
    hidden_count: usize,
    line_truncated: bool,
    has_output: bool,
}

impl Default for CommandOutputCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandOutputCollector {
    pub fn new() -> Self {
        Self::with_limits(PREVIEW_LINE_LIMIT, MAX_LINE_LENGTH)
    }

    pub fn with_limits(preview_limit: usize, max_line_length: usize) -> Self {
        Self {
            preview_limit,
            max_line_length: max_line_length.max(TRUNCATE_MARKER.chars().count()),
            preview_lines: Vec::new(),
            hidden_count: 0,
            line_truncated: false,
            has_output: false,
        }
    }

    /// Record one decoded stdout/stderr line. Empty input is ignored.
    pub fn add_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        self.has_output = true;

        let line = if line.chars().count() > self.max_line_length {
            self.line_truncated = true;
            let keep = self.max_line_length - TRUNCATE_MARKER.chars().count();
            truncate_with_suffix_by_chars(line, keep, TRUNCATE_MARKER)
        } else {
            line.to_string()
        };

        if self.preview_lines.len() < self.preview_limit {
            self.preview_lines.push(line);
        } else {
            self.hidden_count += 1;
        }
    }

    pub fn preview_lines(&self) -> &[String] {
        &self.preview_lines
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden_count
    }

    pub fn has_output(&self) -> bool {
        self.has_output
    }

    /// True when any line was cut or any line was hidden.
    pub fn is_truncated(&self) -> bool {
        self.line_truncated || self.hidden_count > 0
    }
}

/// Decorations contributed by the rewrite engine and scan detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TranscriptOptions<'a> {
    pub is_scan: bool,
    pub annotation: Option<&'a str>,
    pub prologue: &'a [String],
    pub footer_hint: Option<&'a str>,
}

/// Render the footer summary, e.g. `(exit 1, failed, output truncated)`.
pub fn format_footer(collector: &CommandOutputCollector, exit: ExitState) -> String {
    let mut parts: Vec<String> = Vec::new();
    match exit {
        ExitState::Exited(code) => {
            parts.push(format!("exit {code}"));
            if code != 0 {
                parts.push("failed".to_string());
            }
        }
        ExitState::TimedOut { secs } => parts.push(format!("timeout ({secs}s)")),
        ExitState::Terminated => parts.push("terminated".to_string()),
    }
    if !collector.has_output() {
        parts.push("no output".to_string());
    }
    if collector.is_truncated() {
        parts.push("output truncated".to_string());
    }
    format!("({})", parts.join(", "))
}

/// Render a full command transcript block. Always ends with a newline.
pub fn format_transcript(
    command: &str,
    collector: &CommandOutputCollector,
    exit: ExitState,
    options: TranscriptOptions<'_>,
) -> String {
    let mut lines = Vec::with_capacity(collector.preview_lines().len() + 4);

    let mut header = format!("• Ran {command}");
    if options.is_scan {
        header.push_str(" (scan)");
    }
    if let Some(annotation) = options.annotation {
        header.push_str(&format!("  [{annotation}]"));
    }
    lines.push(header);

    for line in options.prologue {
        lines.push(body_line(line));
    }
    for line in collector.preview_lines() {
        lines.push(body_line(line));
    }
    if collector.hidden_count() > 0 {
        lines.push(format!("  │ {ELLIPSIS} +{} lines", collector.hidden_count()));
    }

    lines.push(format!("  └ {}", format_footer(collector, exit)));
    if let Some(hint) = options.footer_hint {
        lines.push(format!("  └ {hint}"));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn body_line(line: &str) -> String {
    if line.is_empty() {
        "  │ ".to_string()
    } else {
        format!("  │ {line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_line_and_overflow_are_both_reported() {
        let mut collector = CommandOutputCollector::new();
        for i in 1..=25 {
            if i == 13 {
                collector.add_line(&"x".repeat(5000));
            } else {
                collector.add_line(&format!("line {i}"));
            }
        }
        assert_eq!(collector.preview_lines().len(), 20);
        assert_eq!(collector.hidden_count(), 5);
        assert!(collector.is_truncated());

        let cut = &collector.preview_lines()[12];
        assert_eq!(cut.chars().count(), MAX_LINE_LENGTH);
        assert!(cut.ends_with(TRUNCATE_MARKER));
    }

    #[test]
    fn empty_lines_are_ignored() {
        let mut collector = CommandOutputCollector::new();
        collector.add_line("");
        assert!(!collector.has_output());
        assert!(collector.preview_lines().is_empty());
        assert!(!collector.is_truncated());
    }

    #[test]
    fn line_at_limit_is_kept_whole() {
        let mut collector = CommandOutputCollector::new();
        let line = "é".repeat(MAX_LINE_LENGTH);
        collector.add_line(&line);
        assert_eq!(collector.preview_lines()[0], line);
        assert!(!collector.is_truncated());
    }

    #[test]
    fn footer_for_clean_exit_without_output() {
        let collector = CommandOutputCollector::new();
        assert_eq!(
            format_footer(&collector, ExitState::Exited(0)),
            "(exit 0, no output)"
        );
    }

    #[test]
    fn footer_for_timeout_without_output() {
        let collector = CommandOutputCollector::new();
        assert_eq!(
            format_footer(&collector, ExitState::TimedOut { secs: 60 }),
            "(timeout (60s), no output)"
        );
    }

    #[test]
    fn footer_flags_failure_and_truncation() {
        let mut collector = CommandOutputCollector::with_limits(1, MAX_LINE_LENGTH);
        collector.add_line("a");
        collector.add_line("b");
        assert_eq!(
            format_footer(&collector, ExitState::Exited(2)),
            "(exit 2, failed, output truncated)"
        );
        assert_eq!(
            format_footer(&collector, ExitState::Terminated),
            "(terminated, output truncated)"
        );
    }

    #[test]
    fn transcript_renders_header_body_and_footer() {
        let mut collector = CommandOutputCollector::with_limits(2, MAX_LINE_LENGTH);
        collector.add_line("alpha");
        collector.add_line(" ");
        collector.add_line("gamma");
        collector.add_line("delta");

        let text = format_transcript(
            "scan src",
            &collector,
            ExitState::Exited(0),
            TranscriptOptions {
                is_scan: true,
                ..TranscriptOptions::default()
            },
        );
        assert_eq!(
            text,
            "• Ran scan src (scan)\n  │ alpha\n  │  \n  │ … +2 lines\n  └ (exit 0, output truncated)\n"
        );
    }

    #[test]
    fn transcript_includes_rewrite_decorations() {
        let collector = CommandOutputCollector::new();
        let prologue = vec!["original: grep -n foo a.txt".to_string()];
        let text = format_transcript(
            "rg --line-number foo a.txt",
            &collector,
            ExitState::Exited(1),
            TranscriptOptions {
                is_scan: false,
                annotation: Some("auto-rewritten"),
                prologue: &prologue,
                footer_hint: Some("disable via cli_output.replace_grep_with_rg"),
            },
        );
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "• Ran rg --line-number foo a.txt  [auto-rewritten]",
                "  │ original: grep -n foo a.txt",
                "  └ (exit 1, failed, no output)",
                "  └ disable via cli_output.replace_grep_with_rg",
            ]
        );
    }
}
