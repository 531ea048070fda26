//! Configuration data model.
//!
//! Struct definitions plus defaults. Loading and env overrides live in
//! `config::mod`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_BASH_TIMEOUT_SECS, DEFAULT_MAX_STEPS_PER_RUN, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_SCAN_TOOL_PATTERNS, DEFAULT_VISIBLE_SLOTS,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cli_output: CliOutputConfig,
    pub shell: ShellConfig,
    pub loop_control: LoopControlConfig,
    pub bash: BashConfig,
}

/// Shell-tool output presentation and grep rewriting.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CliOutputConfig {
    /// Command prefixes that get a `(scan)` marker in transcripts.
    pub scan_tool_patterns: Vec<String>,
    /// Rewrite `grep` invocations to `rg` when the translation is exact.
    pub replace_grep_with_rg: bool,
    /// Allow the provisioner to ask for a ripgrep download.
    pub auto_install_ripgrep: bool,
    /// Explicit `rg` binary to use instead of searching `PATH`.
    pub ripgrep_path: Option<PathBuf>,
}

impl Default for CliOutputConfig {
    fn default() -> Self {
        Self {
            scan_tool_patterns: DEFAULT_SCAN_TOOL_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            replace_grep_with_rg: true,
            auto_install_ripgrep: false,
            ripgrep_path: None,
        }
    }
}

/// Interactive shell settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    pub task_banner: TaskBannerConfig,
}

/// Task banner layout.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TaskBannerConfig {
    pub visible_slots: usize,
    pub refresh_interval_secs: f64,
}

impl Default for TaskBannerConfig {
    fn default() -> Self {
        Self {
            visible_slots: DEFAULT_VISIBLE_SLOTS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

/// Agent loop limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopControlConfig {
    pub max_steps_per_run: u32,
}

impl Default for LoopControlConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: DEFAULT_MAX_STEPS_PER_RUN,
        }
    }
}

/// Shell tool settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BashConfig {
    pub default_timeout_secs: u64,
}

impl Default for BashConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_BASH_TIMEOUT_SECS,
        }
    }
}
