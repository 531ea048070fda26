//! CLI entry point for conductor.

mod cli;

use clap::Parser;
use conductor::config::{load_config, Config};
use conductor::runs::{new_run_id, write_ndjson, RunExecutor, RunRecord, RunStatus};
use conductor::runtime::shell::ShellRuntime;
use conductor::runtime::{ApprovalGate, ApprovalPolicy, TaskManager, TaskStore};
use conductor::tools::rewrite::RewriteEngine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    init_tracing();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let code = match args.command {
        None => run_interactive(&config, args.yolo).await,
        Some(cli::Command::Run { command, batch }) => {
            run_once(&config, &command, batch, args.yolo).await
        }
        Some(cli::Command::Rewrite { command }) => show_rewrite(&config, &command, args.yolo).await,
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn task_manager(config: &Config, policy: ApprovalPolicy) -> Arc<TaskManager> {
    let runtime = Arc::new(ShellRuntime::from_config(config));
    Arc::new(TaskManager::new(TaskStore::new(), runtime, policy))
}

async fn run_interactive(config: &Config, yolo: bool) -> i32 {
    let manager = task_manager(config, ApprovalPolicy::new(yolo));
    match conductor::repl::run_repl(manager, config).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: failed to read input: {e}");
            1
        }
    }
}

/// Approvals in run mode are answered by the executor, so the policy never
/// short-circuits them and every decision shows up in the record stream.
async fn run_once(config: &Config, command: &str, batch: bool, yolo: bool) -> i32 {
    let manager = task_manager(config, ApprovalPolicy::new(false));
    let executor = Arc::new(RunExecutor::new(Arc::clone(&manager), yolo));

    let status = if batch {
        let document = executor.execute_batch(command).await;
        match serde_json::to_string_pretty(&document) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: failed to encode run document: {e}"),
        }
        document.status
    } else {
        let run_id = new_run_id();
        let (tx, mut rx) = mpsc::unbounded_channel::<RunRecord>();
        let printer = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = write_ndjson(&mut std::io::stdout(), &record) {
                    warn!(error = %e, "failed to write run record");
                    break;
                }
            }
        });

        let interrupt = {
            let executor = Arc::clone(&executor);
            let run_id = run_id.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!(run_id = %run_id, "interrupt received");
                    executor.cancel(&run_id);
                }
            })
        };

        let status = executor.execute(&run_id, command, &tx).await;
        interrupt.abort();
        drop(tx);
        let _ = printer.await;
        status
    };

    manager.shutdown().await;
    if status == RunStatus::Finished {
        0
    } else {
        1
    }
}

async fn show_rewrite(config: &Config, command: &str, yolo: bool) -> i32 {
    let engine = RewriteEngine::from_config(&config.cli_output);
    let gate = ApprovalGate::detached(ApprovalPolicy::new(yolo));
    let result = engine.rewrite(command, &gate).await;
    match serde_json::to_string_pretty(&result) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("error: failed to encode rewrite result: {e}");
            1
        }
    }
}
