//! Child-process execution with live line streaming.
//!
//! Runs the external regression runner, delivering stdout line-by-line to a
//! caller callback as it is produced rather than buffering until exit.
//! stderr is collected separately and handed back with the exit code.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One runner invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child; inherits the server's when absent.
    pub workdir: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        ProcessRequest {
            program: program.into(),
            args,
            workdir: None,
        }
    }

    /// Human-readable form of the invocation, for job display.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Final state of a completed child process.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Child exit code; -1 when the child was terminated by a signal.
    pub returncode: i32,
    /// Collected stderr, line by line, in emission order.
    pub stderr_lines: Vec<String>,
}

/// Failures of the runner invocation itself (not of the tests it ran).
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be started; no output lines were produced.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the child's output streams failed mid-run.
    #[error("Failed to read runner output: {0}")]
    Stream(#[from] std::io::Error),

    /// The job was cancelled before the child was spawned. Once spawned,
    /// the child always runs to completion.
    #[error("Cancelled before launch")]
    Cancelled,
}

/// Run a child process to completion, streaming stdout lines to `on_line`.
///
/// Blocks the calling task until the child exits. Each complete stdout line
/// is delivered exactly once, in emission order. The cancellation token is
/// only observed before spawn; in-flight processes are never killed.
pub async fn run_streaming<F>(
    request: &ProcessRequest,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<ProcessOutcome, ProcessError>
where
    F: FnMut(&str),
{
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &request.workdir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ProcessError::Launch {
        program: request.program.clone(),
        source,
    })?;

    debug!("Spawned '{}' (pid {:?})", request.program, child.id());

    let stdout = child.stdout.take().expect("child stdout was piped");
    let stderr = child.stderr.take().expect("child stderr was piped");

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines_reader = BufReader::new(stderr).lines();

    let stdout_fut = async {
        while let Some(line) = stdout_lines.next_line().await? {
            on_line(&line);
        }
        Ok::<(), std::io::Error>(())
    };

    let stderr_fut = async {
        let mut collected = Vec::new();
        while let Some(line) = stderr_lines_reader.next_line().await? {
            collected.push(line);
        }
        Ok::<Vec<String>, std::io::Error>(collected)
    };

    let (stdout_result, stderr_result) = tokio::join!(stdout_fut, stderr_fut);
    stdout_result?;
    let stderr_lines = stderr_result?;

    let status = child.wait().await?;
    let returncode = status.code().unwrap_or(-1);

    debug!("'{}' exited with code {}", request.program, returncode);

    Ok(ProcessOutcome {
        returncode,
        stderr_lines,
    })
}
