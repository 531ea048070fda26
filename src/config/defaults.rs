//! Default configuration constants.

/// Command prefixes rendered with a `(scan)` marker in transcripts.
pub(super) const DEFAULT_SCAN_TOOL_PATTERNS: [&str; 3] = ["scan", "rg --files", "openspec validate"];
/// Task rows shown in the banner.
pub(super) const DEFAULT_VISIBLE_SLOTS: usize = 4;
/// Banner redraw cadence.
pub(super) const DEFAULT_REFRESH_INTERVAL_SECS: f64 = 1.0;
/// Ceiling on agent steps for a single turn.
pub(super) const DEFAULT_MAX_STEPS_PER_RUN: u32 = 100;
/// Shell tool timeout when the caller does not pass one.
pub const DEFAULT_BASH_TIMEOUT_SECS: u64 = 60;
/// Largest shell tool timeout a caller may request.
pub const MAX_BASH_TIMEOUT_SECS: u64 = 300;

pub(super) const VISIBLE_SLOTS_RANGE: (usize, usize) = (1, 16);
pub(super) const REFRESH_INTERVAL_RANGE: (f64, f64) = (0.1, 10.0);
