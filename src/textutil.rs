//! Shared UTF-8-safe truncation helpers.
//!
//! Previews, log briefs and transcript lines all cut text by characters.
//! Byte slicing would panic on multi-byte boundaries, so everything goes
//! through these helpers.

/// Ellipsis appended to shortened log briefs.
pub const ELLIPSIS: &str = "…";

/// Truncate by characters and append `suffix` when truncation occurs.
pub fn truncate_with_suffix_by_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    format!("{prefix}{suffix}")
}

/// Shorten `text` to `keep` characters plus `…` when it is longer than `limit`.
///
/// Log briefs use a limit a few characters above `keep` so short overruns
/// are shown whole.
pub fn shorten(text: &str, limit: usize, keep: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    truncate_with_suffix_by_chars(text, keep, ELLIPSIS)
}

/// Strip trailing carriage returns and newlines from a decoded output line.
pub fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}
