//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`CONDUCTOR_REPLACE_GREP_WITH_RG`, `CONDUCTOR_RG_PATH`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./conductor.toml in the current directory
//! 4. $XDG_CONFIG_HOME/conductor/conductor.toml (or ~/.config/conductor/conductor.toml)
//! 5. Built-in defaults

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

mod defaults;
mod types;

pub use defaults::{DEFAULT_BASH_TIMEOUT_SECS, MAX_BASH_TIMEOUT_SECS};
use defaults::{REFRESH_INTERVAL_RANGE, VISIBLE_SLOTS_RANGE};
pub use types::{
    BashConfig, CliOutputConfig, Config, LoopControlConfig, ShellConfig, TaskBannerConfig,
};

const CONFIG_FILE_NAME: &str = "conductor.toml";

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let text = read_config_text(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup)?;
    normalize(&mut config)?;
    Ok(config)
}

fn read_config_text<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<String, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // An explicit path must exist; the implicit locations are optional.
    if let Some(p) = path_override {
        return Ok(read_file(Path::new(p))?);
    }
    if let Ok(text) = read_file(Path::new(CONFIG_FILE_NAME)) {
        return Ok(text);
    }
    if let Some(dir) = config_root() {
        if let Ok(text) = read_file(&dir.join("conductor").join(CONFIG_FILE_NAME)) {
            return Ok(text);
        }
    }
    Ok(String::new())
}

fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(raw) = env_lookup("CONDUCTOR_REPLACE_GREP_WITH_RG") {
        config.cli_output.replace_grep_with_rg = parse_bool_env(&raw).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid CONDUCTOR_REPLACE_GREP_WITH_RG value `{raw}`: expected true or false"
            ))
        })?;
    }
    if let Some(path) = env_lookup("CONDUCTOR_RG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            config.cli_output.ripgrep_path = Some(PathBuf::from(trimmed));
        }
    }
    Ok(())
}

fn parse_bool_env(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Clamp presentation knobs and reject limits that would disable the runtime.
fn normalize(config: &mut Config) -> Result<(), ConfigError> {
    let banner = &mut config.shell.task_banner;
    banner.visible_slots = banner
        .visible_slots
        .clamp(VISIBLE_SLOTS_RANGE.0, VISIBLE_SLOTS_RANGE.1);
    if !banner.refresh_interval_secs.is_finite() {
        banner.refresh_interval_secs = 1.0;
    }
    banner.refresh_interval_secs = banner
        .refresh_interval_secs
        .clamp(REFRESH_INTERVAL_RANGE.0, REFRESH_INTERVAL_RANGE.1);

    if config.loop_control.max_steps_per_run == 0 {
        return Err(ConfigError::Invalid(
            "loop_control.max_steps_per_run must be at least 1".into(),
        ));
    }
    let timeout = config.bash.default_timeout_secs;
    if !(1..=MAX_BASH_TIMEOUT_SECS).contains(&timeout) {
        return Err(ConfigError::Invalid(format!(
            "bash.default_timeout_secs must be between 1 and {MAX_BASH_TIMEOUT_SECS}, got {timeout}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Root directory for per-user config (`$XDG_CONFIG_HOME` or `~/.config`).
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}

/// Directory where a provisioned `rg` binary is expected.
pub fn managed_bin_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("conductor").join("bin"))
}
