//! The `Bash` tool.
//!
//! Asks for approval, passes the command through the grep rewrite engine,
//! streams its output into a bounded collector and returns a transcript.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

use super::execution::{format_duration, stream_subprocess, ExitState};
use super::rewrite::RewriteEngine;
use super::transcript::{format_transcript, CommandOutputCollector, TranscriptOptions};
use super::{Tool, ToolContext, ToolOutcome};
use crate::config::{Config, MAX_BASH_TIMEOUT_SECS};
use crate::error::ToolError;

pub const BASH_TOOL_NAME: &str = "Bash";
const APPROVAL_ACTION: &str = "run shell command";

/// Tool that runs shell commands through `sh -c`.
pub struct BashTool {
    rewrite: RewriteEngine,
    scan_patterns: Vec<String>,
    default_timeout_secs: u64,
}

#[derive(Deserialize)]
struct Args {
    command: String,
    timeout: Option<u64>,
}

impl BashTool {
    pub fn new(rewrite: RewriteEngine, scan_patterns: Vec<String>, default_timeout_secs: u64) -> Self {
        Self {
            rewrite,
            scan_patterns,
            default_timeout_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RewriteEngine::from_config(&config.cli_output),
            config.cli_output.scan_tool_patterns.clone(),
            config.bash.default_timeout_secs,
        )
    }

    fn parse_args(&self, arguments: &str) -> Result<(String, u64), ToolError> {
        let args: Args = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".into()));
        }
        let timeout = args.timeout.unwrap_or(self.default_timeout_secs);
        if !(1..=MAX_BASH_TIMEOUT_SECS).contains(&timeout) {
            return Err(ToolError::InvalidArguments(format!(
                "timeout must be between 1 and {MAX_BASH_TIMEOUT_SECS} seconds, got {timeout}"
            )));
        }
        Ok((args.command, timeout))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        BASH_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Run a shell command and return a transcript of its output and exit status."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute."
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_BASH_TIMEOUT_SECS,
                    "description": "Seconds before the command is killed."
                }
            },
            "required": ["command"]
        })
    }

    async fn call(&self, arguments: &str, context: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let (command, timeout_secs) = self.parse_args(arguments)?;

        let response = context
            .approvals
            .request(
                BASH_TOOL_NAME,
                APPROVAL_ACTION,
                &format!("Run command `{command}`"),
            )
            .await;
        if !response.is_approved() {
            return Ok(ToolOutcome::rejected());
        }

        let is_scan = is_scan_command(&command, &self.scan_patterns);
        let rewrite = self.rewrite.rewrite(&command, &context.approvals).await;
        if rewrite.is_rewritten() {
            info!(original = %command, rewritten = %rewrite.command_to_run, "running rewritten command");
        }

        let collector = Arc::new(Mutex::new(CommandOutputCollector::new()));
        let sink = Arc::clone(&collector);
        let on_line = move |line: String| {
            if let Ok(mut collector) = sink.lock() {
                collector.add_line(&line);
            }
        };

        let started = Instant::now();
        // Dropping the subprocess future on cancellation kills the child.
        let exit = tokio::select! {
            exit = stream_subprocess(
                &rewrite.command_to_run,
                Duration::from_secs(timeout_secs),
                on_line,
            ) => exit?,
            _ = context.cancel.cancelled() => ExitState::Terminated,
        };
        info!(
            command = %rewrite.command_to_run,
            exit = ?exit,
            elapsed = %format_duration(started.elapsed()),
            "shell command finished"
        );

        let collector = collector.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let transcript = format_transcript(
            &rewrite.display_command,
            &collector,
            exit,
            TranscriptOptions {
                is_scan,
                annotation: rewrite.annotation.as_deref(),
                prologue: &rewrite.prologue_lines,
                footer_hint: rewrite.footer_hint.as_deref(),
            },
        );

        Ok(match exit {
            ExitState::Exited(0) => ToolOutcome::ok(transcript, "Command executed successfully."),
            ExitState::Exited(code) => ToolOutcome::error(
                transcript,
                format!("Command failed with exit code: {code}."),
                format!("Failed with exit code: {code}"),
            ),
            ExitState::TimedOut { secs } => ToolOutcome::error(
                transcript,
                format!("Command killed by timeout ({secs}s)"),
                format!("Killed by timeout ({secs}s)"),
            ),
            ExitState::Terminated if context.cancel.is_cancelled() => {
                ToolOutcome::error(transcript, "Command was interrupted.", "Interrupted")
            }
            ExitState::Terminated => ToolOutcome::error(
                transcript,
                "Command terminated by signal.",
                "Terminated by signal",
            ),
        })
    }
}

/// True when `command` starts with one of the configured scan patterns,
/// either as its first word or as a plain prefix.
pub fn is_scan_command(command: &str, patterns: &[String]) -> bool {
    let normalized = command.trim();
    if normalized.is_empty() {
        return false;
    }
    let base = normalized.split_whitespace().next().unwrap_or_default();
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| base == pattern || normalized.starts_with(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::approvals::{ApprovalGate, ApprovalPolicy};
    use crate::runtime::CancelSignal;
    use crate::testsupport::{FakeGrepCompatibility, FakeProvisioner};

    fn tool() -> BashTool {
        let rewrite = RewriteEngine::new(
            true,
            Arc::new(FakeGrepCompatibility::new(true)),
            Arc::new(FakeProvisioner::new(Ok("rg".into()))),
        );
        BashTool::new(rewrite, vec!["scan".into(), "rg --files".into()], 60)
    }

    fn context(yolo: bool) -> ToolContext {
        ToolContext {
            approvals: ApprovalGate::detached(ApprovalPolicy::new(yolo)),
            cancel: CancelSignal::new(),
        }
    }

    #[test]
    fn scan_detection_matches_first_word_or_prefix() {
        let patterns = vec!["scan".to_string(), "rg --files".to_string(), " ".to_string()];
        assert!(is_scan_command("scan src", &patterns));
        assert!(is_scan_command("  rg --files | head", &patterns));
        assert!(!is_scan_command("rg foo", &patterns));
        assert!(!is_scan_command("", &patterns));
    }

    #[test]
    fn timeout_outside_range_is_rejected() {
        let tool = tool();
        assert!(matches!(
            tool.parse_args(r#"{"command":"ls","timeout":0}"#),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            tool.parse_args(r#"{"command":"ls","timeout":301}"#),
            Err(ToolError::InvalidArguments(_))
        ));
        assert_eq!(tool.parse_args(r#"{"command":"ls"}"#).unwrap().1, 60);
        assert!(tool.parse_args(r#"{"command":"  "}"#).is_err());
    }

    #[tokio::test]
    async fn successful_command_returns_transcript() {
        let out = tool()
            .call(r#"{"command":"echo hello"}"#, &context(true))
            .await
            .unwrap();
        assert!(out.ok);
        assert_eq!(out.message, "Command executed successfully.");
        assert_eq!(out.output, "• Ran echo hello\n  │ hello\n  └ (exit 0)\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let out = tool()
            .call(r#"{"command":"exit 3"}"#, &context(true))
            .await
            .unwrap();
        assert!(!out.ok);
        assert_eq!(out.message, "Command failed with exit code: 3.");
        assert_eq!(out.brief, "Failed with exit code: 3");
        assert!(out.output.ends_with("  └ (exit 3, failed, no output)\n"));
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let out = tool()
            .call(r#"{"command":"sleep 5","timeout":1}"#, &context(true))
            .await
            .unwrap();
        assert_eq!(out.brief, "Killed by timeout (1s)");
        assert!(out.output.ends_with("  └ (timeout (1s), no output)\n"));
    }

    #[tokio::test]
    async fn rejection_skips_execution() {
        let out = tool()
            .call(r#"{"command":"touch should-not-exist"}"#, &context(false))
            .await
            .unwrap();
        assert_eq!(out, ToolOutcome::rejected());
    }

    #[tokio::test]
    async fn cancellation_terminates_command() {
        let ctx = context(true);
        let cancel = ctx.cancel.clone();
        let tool = tool();
        let call = tool.call(r#"{"command":"sleep 5"}"#, &ctx);
        let (out, _) = tokio::join!(call, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let out = out.unwrap();
        assert_eq!(out.brief, "Interrupted");
        assert!(out.output.contains("(terminated, no output)"));
    }
}
