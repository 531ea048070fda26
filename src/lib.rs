//! Conductor: run shell work as background tasks.
//!
//! A [`runtime::TaskManager`] queues tasks and runs them one at a time
//! through an [`runtime::AgentRuntime`]. The built-in
//! [`runtime::shell::ShellRuntime`] executes each input line with the `Bash`
//! tool, which asks for approval, rewrites GNU grep invocations to ripgrep
//! when it is safe, and returns a bounded transcript. Frontends observe
//! tasks through the [`runtime::TaskStore`] event stream.
//!
//! # Quick start
//!
//! ```no_run
//! use conductor::config::load_config;
//! use conductor::runtime::shell::ShellRuntime;
//! use conductor::runtime::{ApprovalPolicy, TaskManager, TaskStore};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let runtime = Arc::new(ShellRuntime::from_config(&config));
//! let manager = TaskManager::new(TaskStore::new(), runtime, ApprovalPolicy::new(true));
//! let task = manager.submit("ls -la", "ls -la".into(), false);
//! let done = manager.wait_finished(task.id).await.unwrap();
//! println!("{}", done.summary.unwrap_or_default());
//! # }
//! ```

pub mod build_info;
pub mod config;
pub mod error;
pub mod repl;
pub mod runs;
pub mod runtime;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod tools;
