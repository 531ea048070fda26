//! Collaborators the rewrite engine consults before touching a command:
//! a grep compatibility check and a ripgrep provisioner.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{managed_bin_dir, CliOutputConfig};
use crate::runtime::approvals::ApprovalGate;

/// Guidance appended when ripgrep cannot be found.
pub const MANUAL_INSTALL_HINT: &str = "Install ripgrep manually from https://github.com/BurntSushi/ripgrep/releases and make sure `rg` is on PATH.";

const INSTALL_ACTION: &str = "install ripgrep";

// ---------------------------------------------------------------------------
// Grep compatibility
// ---------------------------------------------------------------------------

/// Decides whether the grep a command name resolves to is GNU-compatible.
#[async_trait]
pub trait GrepCompatibility: Send + Sync {
    async fn is_compatible(&self, command_name: &str) -> bool;
}

/// Runs `<grep> --version`, caching verdicts by resolved binary path.
#[derive(Debug, Default)]
pub struct GrepDetector {
    cache: Mutex<HashMap<PathBuf, bool>>,
}

impl GrepDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, path: &Path) -> Option<bool> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(path).copied())
    }

    fn remember(&self, path: PathBuf, verdict: bool) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path, verdict);
        }
    }
}

#[async_trait]
impl GrepCompatibility for GrepDetector {
    async fn is_compatible(&self, command_name: &str) -> bool {
        let Ok(resolved) = which::which(command_name) else {
            return false;
        };
        if let Some(verdict) = self.cached(&resolved) {
            return verdict;
        }

        let verdict = match Command::new(&resolved).arg("--version").output().await {
            Ok(output) => {
                let text = format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                let verdict = looks_like_gnu_grep(&text);
                if !verdict {
                    let first_line = text.trim().lines().next().unwrap_or("unknown");
                    warn!(path = %resolved.display(), version = first_line, "unsupported grep implementation");
                }
                verdict
            }
            Err(e) => {
                debug!(path = %resolved.display(), error = %e, "grep version check failed");
                false
            }
        };
        self.remember(resolved, verdict);
        verdict
    }
}

/// Classify `grep --version` output.
pub fn looks_like_gnu_grep(version_output: &str) -> bool {
    let text = version_output.to_ascii_lowercase();
    let gnu = text.contains("gnu grep") || text.contains("gnu compatible") || text.contains("grep (gnu");
    gnu && !text.contains("busybox")
}

// ---------------------------------------------------------------------------
// Ripgrep provisioning
// ---------------------------------------------------------------------------

/// Why ripgrep could not be made available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// A human declined the download.
    Rejected,
    /// No usable binary exists and none can be obtained.
    Unavailable(String),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "ripgrep is required but the download was rejected"),
            Self::Unavailable(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ProvisionError {}

/// Makes a ripgrep binary available and returns the program token to run.
#[async_trait]
pub trait SearchToolProvisioner: Send + Sync {
    async fn ensure_available(&self, approvals: &ApprovalGate) -> Result<String, ProvisionError>;
}

/// Locates an existing `rg`: configured path, managed bin dir, then `PATH`.
///
/// Downloading is not performed; when nothing is found the caller gets
/// [`ProvisionError::Unavailable`].
#[derive(Debug)]
pub struct RipgrepLocator {
    configured: Option<PathBuf>,
    managed_dir: Option<PathBuf>,
    auto_install: bool,
    resolved: Mutex<Option<String>>,
}

impl RipgrepLocator {
    pub fn new(configured: Option<PathBuf>, managed_dir: Option<PathBuf>, auto_install: bool) -> Self {
        Self {
            configured,
            managed_dir,
            auto_install,
            resolved: Mutex::new(None),
        }
    }

    pub fn from_config(config: &CliOutputConfig) -> Self {
        Self::new(
            config.ripgrep_path.clone(),
            managed_bin_dir(),
            config.auto_install_ripgrep,
        )
    }

    fn locate(&self) -> Option<String> {
        if let Some(path) = self.configured.as_ref().filter(|path| path.is_file()) {
            return Some(path.display().to_string());
        }
        let on_path = which::which("rg").ok();
        if let Some(dir) = &self.managed_dir {
            let candidate = dir.join("rg");
            if candidate.is_file() {
                // Prefer the bare name when PATH already resolves to it.
                if on_path.as_deref() == Some(candidate.as_path()) {
                    return Some("rg".to_string());
                }
                return Some(candidate.display().to_string());
            }
        }
        on_path.map(|_| "rg".to_string())
    }
}

#[async_trait]
impl SearchToolProvisioner for RipgrepLocator {
    async fn ensure_available(&self, approvals: &ApprovalGate) -> Result<String, ProvisionError> {
        if let Some(program) = self.resolved.lock().ok().and_then(|slot| slot.clone()) {
            return Ok(program);
        }
        match self.locate() {
            Some(program) => {
                if let Ok(mut slot) = self.resolved.lock() {
                    *slot = Some(program.clone());
                }
                Ok(program)
            }
            None if self.auto_install => {
                let target = self
                    .managed_dir
                    .as_ref()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_else(|| "the conductor data directory".to_string());
                let response = approvals
                    .request(
                        "Conductor",
                        INSTALL_ACTION,
                        &format!("Download ripgrep into {target}"),
                    )
                    .await;
                if !response.is_approved() {
                    return Err(ProvisionError::Rejected);
                }
                Err(ProvisionError::Unavailable(
                    "`rg` was not found and automatic download is not supported".into(),
                ))
            }
            None => Err(ProvisionError::Unavailable("`rg` was not found".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::approvals::ApprovalPolicy;

    #[test]
    fn gnu_grep_is_recognized() {
        assert!(looks_like_gnu_grep("grep (GNU grep) 3.11\nCopyright"));
        assert!(looks_like_gnu_grep("grep (BSD grep, GNU compatible) 2.6.0-FreeBSD"));
    }

    #[test]
    fn busybox_and_bsd_grep_are_rejected() {
        assert!(!looks_like_gnu_grep("BusyBox v1.36.1 multi-call binary. grep (gnu"));
        assert!(!looks_like_gnu_grep("grep (BSD grep) 2.6.0-FreeBSD"));
        assert!(!looks_like_gnu_grep(""));
    }

    #[tokio::test]
    async fn unknown_command_is_incompatible() {
        let detector = GrepDetector::new();
        assert!(!detector.is_compatible("definitely-not-a-grep-binary").await);
    }

    #[tokio::test]
    async fn configured_path_wins() {
        let exe = std::env::current_exe().unwrap();
        let locator = RipgrepLocator::new(Some(exe.clone()), None, false);
        let gate = ApprovalGate::detached(ApprovalPolicy::default());
        let program = locator.ensure_available(&gate).await.unwrap();
        assert_eq!(program, exe.display().to_string());
    }

    #[tokio::test]
    async fn missing_configured_path_falls_through() {
        let locator = RipgrepLocator::new(
            Some(PathBuf::from("/nonexistent/rg")),
            Some(PathBuf::from("/nonexistent/bin")),
            false,
        );
        let gate = ApprovalGate::detached(ApprovalPolicy::default());
        match locator.ensure_available(&gate).await {
            Ok(program) => assert_eq!(program, "rg"),
            Err(err) => assert_eq!(err.to_string(), "`rg` was not found"),
        }
    }

    #[tokio::test]
    async fn auto_install_asks_before_giving_up() {
        let locator = |auto| {
            RipgrepLocator::new(None, Some(PathBuf::from("/nonexistent/bin")), auto)
        };
        if which::which("rg").is_ok() {
            return;
        }
        let ask = ApprovalGate::detached(ApprovalPolicy::new(false));
        assert_eq!(
            locator(true).ensure_available(&ask).await,
            Err(ProvisionError::Rejected)
        );
        let yolo = ApprovalGate::detached(ApprovalPolicy::new(true));
        let err = locator(true).ensure_available(&yolo).await.unwrap_err();
        assert!(err.to_string().contains("automatic download is not supported"));
    }
}
