//! Built-in agent runtime that runs user input as shell commands.
//!
//! Every non-empty input line is one step: a `Bash` tool call whose result
//! and message are streamed as wire events. Execution stops at the first
//! failed or rejected step.

use async_trait::async_trait;
use tracing::debug;

use super::schema::WireEvent;
use super::{AgentRuntime, TurnContext};
use crate::config::Config;
use crate::error::RunError;
use crate::tools::shell::{BashTool, BASH_TOOL_NAME};
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};

pub struct ShellRuntime {
    tools: ToolRegistry,
    max_steps: u32,
}

impl ShellRuntime {
    pub fn new(tools: ToolRegistry, max_steps: u32) -> Self {
        Self { tools, max_steps }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut tools = ToolRegistry::new();
        tools.register(BashTool::from_config(config));
        Self::new(tools, config.loop_control.max_steps_per_run)
    }
}

#[async_trait]
impl AgentRuntime for ShellRuntime {
    async fn run_turn(&self, turn: TurnContext) -> Result<(), RunError> {
        let input = turn.input.as_text();
        let commands: Vec<&str> = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if commands.is_empty() {
            turn.events.emit(WireEvent::TextDelta {
                text: "Nothing to run.".into(),
            });
            return Ok(());
        }

        let context = ToolContext {
            approvals: turn.approvals.clone(),
            cancel: turn.cancel.clone(),
        };
        for (index, command) in commands.into_iter().enumerate() {
            let n = index as u32 + 1;
            if n > self.max_steps {
                return Err(RunError::MaxStepsReached {
                    steps: self.max_steps,
                });
            }
            if turn.cancel.is_cancelled() {
                turn.events.emit(WireEvent::StepInterrupted);
                return Err(RunError::Cancelled);
            }

            turn.events.emit(WireEvent::StepBegin { n });
            let call_id = format!("call-{}-{n}", turn.task_id);
            let arguments = serde_json::json!({ "command": command }).to_string();
            turn.events.emit(WireEvent::ToolCall {
                id: call_id.clone(),
                name: BASH_TOOL_NAME.to_string(),
                arguments: arguments.clone(),
            });

            let outcome = match self.tools.call(BASH_TOOL_NAME, &arguments, &context).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    debug!(task_id = turn.task_id, error = %err, "tool call failed");
                    ToolOutcome::error("", err.to_string(), "Tool error")
                }
            };
            let ok = outcome.ok;
            let message = outcome.message.clone();
            turn.events.emit(WireEvent::ToolResult {
                tool_call_id: call_id,
                outcome,
            });

            if turn.cancel.is_cancelled() {
                turn.events.emit(WireEvent::StepInterrupted);
                return Err(RunError::Cancelled);
            }
            turn.events.emit(WireEvent::TextDelta { text: message });
            if !ok {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::approvals::{ApprovalGate, ApprovalPolicy};
    use crate::runtime::{CancelSignal, EventSink, TaskInput};
    use tokio::sync::mpsc;

    fn turn(input: &str, yolo: bool) -> (TurnContext, mpsc::UnboundedReceiver<WireEvent>) {
        let (events, rx) = EventSink::channel();
        let cancel = CancelSignal::new();
        let approvals = ApprovalGate::new(1, ApprovalPolicy::new(yolo), events.clone(), cancel.clone());
        let turn = TurnContext {
            task_id: 1,
            input: TaskInput::from(input),
            thinking: false,
            events,
            approvals,
            cancel,
        };
        (turn, rx)
    }

    fn runtime(max_steps: u32) -> ShellRuntime {
        let mut config = Config::default();
        config.cli_output.replace_grep_with_rg = false;
        config.loop_control.max_steps_per_run = max_steps;
        ShellRuntime::from_config(&config)
    }

    fn kinds(rx: &mut mpsc::UnboundedReceiver<WireEvent>) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind().to_string());
        }
        kinds
    }

    #[tokio::test]
    async fn each_line_is_one_step() {
        let (turn, mut rx) = turn("echo one\n\necho two", true);
        runtime(10).run_turn(turn).await.unwrap();
        assert_eq!(
            kinds(&mut rx),
            vec![
                "step_begin", "tool_call", "tool_result", "text_delta",
                "step_begin", "tool_call", "tool_result", "text_delta",
            ]
        );
    }

    #[tokio::test]
    async fn step_ceiling_is_enforced() {
        let (turn, _rx) = turn("true\ntrue\ntrue", true);
        let err = runtime(2).run_turn(turn).await.unwrap_err();
        assert_eq!(err, RunError::MaxStepsReached { steps: 2 });
    }

    #[tokio::test]
    async fn failing_step_stops_the_turn() {
        let (turn, mut rx) = turn("false\necho never", true);
        runtime(10).run_turn(turn).await.unwrap();
        let steps = kinds(&mut rx).iter().filter(|k| *k == "step_begin").count();
        assert_eq!(steps, 1);
    }

    #[tokio::test]
    async fn cancelled_turn_reports_cancellation() {
        let (turn, mut rx) = turn("echo hi", true);
        turn.cancel.cancel();
        let err = runtime(10).run_turn(turn).await.unwrap_err();
        assert_eq!(err, RunError::Cancelled);
        assert_eq!(kinds(&mut rx), vec!["step_interrupted"]);
    }
}
