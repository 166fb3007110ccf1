//! Shell command execution.
//!
//! Two modes: `run` executes a command line through `sh -c` and captures the
//! combined result, `run_streaming` spawns a process directly and delivers
//! stdout chunk-by-chunk to a callback. Non-zero exit codes are reported in
//! the result rather than raised, so callers can inspect captured output from
//! failed commands. Only spawn failures are errors.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Captured result of a completed shell command.
#[derive(Debug, Clone)]
pub struct ShellResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command line through the shell and wait for completion.
///
/// Output is captured in full (diff and tree output can run well past 10 MB)
/// and trailing whitespace is trimmed. The exit code is reported in the
/// result, never raised.
pub async fn run(dir: &Path, command: &str) -> Result<ShellResult> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ProcessError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    Ok(ShellResult {
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string(),
        stderr: String::from_utf8_lossy(&output.stderr)
            .trim_end()
            .to_string(),
    })
}

/// Read from `stream` if present; pend forever when absent.
///
/// Lets the select loop in `run_streaming` treat a finished stream as
/// permanently silent instead of busy-polling it.
async fn read_some<R: tokio::io::AsyncRead + Unpin>(
    stream: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stream.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Spawn a process directly (no shell batching) and stream its stdout.
///
/// `on_stdout` is invoked for each chunk as it arrives. Stderr chunks go to
/// `on_stderr` when provided, otherwise they are forwarded to this process's
/// stderr. Resolves with the exit code (0 when the process was killed by a
/// signal and exposes no code); errors only on spawn failure.
pub async fn run_streaming(
    dir: &Path,
    command: &str,
    args: &[String],
    mut on_stdout: impl FnMut(&str),
    mut on_stderr: Option<&mut dyn FnMut(&str)>,
) -> Result<i32> {
    let mut child = Command::new(command)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProcessError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_some(&mut stdout, &mut out_buf) => {
                match n? {
                    0 => stdout = None,
                    n => on_stdout(&String::from_utf8_lossy(&out_buf[..n])),
                }
            }
            n = read_some(&mut stderr, &mut err_buf) => {
                match n? {
                    0 => stderr = None,
                    n => {
                        let chunk = String::from_utf8_lossy(&err_buf[..n]);
                        match on_stderr.as_mut() {
                            Some(callback) => callback(&chunk),
                            None => eprint!("{chunk}"),
                        }
                    }
                }
            }
        }
    }

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(0))
}

/// Check whether a named executable is resolvable on the search path.
pub fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}
