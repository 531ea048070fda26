//! Local subprocess execution with line streaming and a hard timeout.
//!
//! Commands run through `sh -c`. Stdout and stderr are drained by two reader
//! loops that share one timeout with the final `wait`, so the exit status is
//! only reported once both streams hit EOF.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::textutil::trim_line_ending;

/// Upper bound on bytes buffered for a single line. The remainder of an
/// oversized line is discarded.
const MAX_LINE_BYTES: u64 = 16 * 1024;

/// How a streamed subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// The process exited on its own with this status code.
    Exited(i32),
    /// The timeout fired and the process was killed.
    TimedOut { secs: u64 },
    /// The process was stopped by a signal or by cancellation.
    Terminated,
}

/// Run `command` through `sh -c`, feeding each output line to `on_line`.
///
/// Lines are decoded lossily with trailing `\r`/`\n` removed. Lines read
/// before a timeout are kept by the caller's sink; the child is killed and
/// reaped before returning [`ExitState::TimedOut`].
///
/// Dropping the returned future kills the child.
pub async fn stream_subprocess<F>(
    command: &str,
    limit: Duration,
    on_line: F,
) -> Result<ExitState, ExecError>
where
    F: Fn(String) + Send + Sync,
{
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ExecError::Spawn)?;
    debug!(command, pid = child.id(), "spawned shell command");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let on_line = &on_line;

    let finished = timeout(limit, async {
        let (out, err) = tokio::join!(read_lines(stdout, on_line), read_lines(stderr, on_line));
        for result in [out, err] {
            if let Err(e) = result {
                debug!(error = %e, "output stream closed with error");
            }
        }
        child.wait().await
    })
    .await;

    match finished {
        Ok(Ok(status)) => Ok(match status.code() {
            Some(code) => ExitState::Exited(code),
            None => ExitState::Terminated,
        }),
        Ok(Err(e)) => Err(ExecError::Wait(e)),
        Err(_) => {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill timed-out command");
            }
            child.wait().await.map_err(ExecError::Wait)?;
            debug!(command, secs = limit.as_secs(), "command killed by timeout");
            Ok(ExitState::TimedOut {
                secs: limit.as_secs(),
            })
        }
    }
}

async fn read_lines<R, F>(stream: Option<R>, on_line: &F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: Fn(String),
{
    let Some(stream) = stream else {
        return Ok(());
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        let complete = buf.last() == Some(&b'\n');
        on_line(trim_line_ending(&String::from_utf8_lossy(&buf)).to_string());
        if !complete && n as u64 == MAX_LINE_BYTES {
            skip_rest_of_line(&mut reader).await?;
        }
    }
}

async fn skip_rest_of_line<R>(reader: &mut BufReader<R>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let n = (&mut *reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut scratch)
            .await?;
        if n == 0 || scratch.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

/// Human-oriented duration formatting used in log lines.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    if secs == 0 {
        return format!("{millis}ms");
    }
    if millis == 0 {
        if secs % 3600 == 0 {
            return format!("{}h", secs / 3600);
        }
        if secs % 60 == 0 {
            return format!("{}m", secs / 60);
        }
        return format!("{secs}s");
    }
    format!("{secs}.{millis:03}s")
}
