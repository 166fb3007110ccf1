//! Composer/assistant subprocess pipeline.
//!
//! One invocation spawns the assistant CLI (and optionally a composer process
//! whose stdout is piped into the assistant's stdin), collects the assistant's
//! newline-delimited JSON event stream, and retains the final line as the
//! authoritative terminal record. Every invocation is bracketed by the
//! untracked-file ledger so stray files the assistant creates are swept on
//! all exit paths, including failures.

use crate::ledger;
use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum bytes captured per stream. Prevents OOM on runaway output while
/// staying far above the largest diff/tree payloads seen in practice.
const MAX_CAPTURE_BYTES: usize = 50 * 1024 * 1024;

/// The only tool capability the assistant is granted.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Write"];

/// Capabilities explicitly denied to the assistant.
pub const DEFAULT_DISALLOWED_TOOLS: &[&str] = &[
    "Read",
    "Bash",
    "Task",
    "WebSearch",
    "Glob",
    "Grep",
    "LS",
    "Edit",
    "MultiEdit",
    "NotebookRead",
    "NotebookEdit",
    "WebFetch",
    "TodoRead",
    "TodoWrite",
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("prompt template {name} not found (tried: {tried:?})")]
    PromptNotFound { name: String, tried: Vec<PathBuf> },
    #[error("assistant CLI not found at {0}; ensure it is installed or set CLAUDE_EXECUTABLE")]
    AssistantNotFound(PathBuf),
    #[error("failed to start composer: {0}")]
    ComposerSpawn(#[source] std::io::Error),
    #[error("failed to start assistant: {0}")]
    AssistantSpawn(#[source] std::io::Error),
    #[error("assistant failed with exit code {exit_code}{detail}")]
    AssistantFailed { exit_code: i32, detail: String },
    #[error("no response received from assistant")]
    NoResponse,
    #[error("invalid response format from assistant: {reason} (last line: {line})")]
    InvalidResponse { line: String, reason: String },
    #[error("assistant returned an error result: {message}")]
    ErrorResult { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// One parsed record from the assistant's event stream.
///
/// Everything before the terminal record is progress/telemetry; only the
/// final line carries meaning.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl AssistantEvent {
    /// True for a terminal success record.
    pub fn is_success(&self) -> bool {
        self.kind == "result" && self.subtype.as_deref() == Some("success")
    }
}

/// Newline splitter with carry-over for partial lines.
///
/// A JSON record may straddle a chunk boundary, so bytes after the last
/// newline of each chunk are carried into the next. Blank lines are skipped;
/// the most recent complete line is retained as the authoritative record.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    carry: Vec<u8>,
    last_line: Option<String>,
    lines: usize,
}

impl LineAccumulator {
    /// Feed one chunk of raw output, invoking `on_line` per complete line.
    pub fn push_chunk(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        self.carry.extend_from_slice(chunk);
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            self.accept(text.trim_end_matches(['\n', '\r']), &mut on_line);
        }
    }

    /// Flush any trailing partial line once the stream has ended.
    pub fn finish(&mut self, mut on_line: impl FnMut(&str)) {
        if !self.carry.is_empty() {
            let rest = std::mem::take(&mut self.carry);
            let text = String::from_utf8_lossy(&rest);
            self.accept(text.trim_end_matches('\r'), &mut on_line);
        }
    }

    fn accept(&mut self, line: &str, on_line: &mut impl FnMut(&str)) {
        if line.trim().is_empty() {
            return;
        }
        self.lines += 1;
        on_line(line);
        self.last_line = Some(line.to_string());
    }

    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    pub fn line_count(&self) -> usize {
        self.lines
    }
}

/// Locate the assistant executable.
///
/// `CLAUDE_EXECUTABLE` overrides; the default is the per-user install under
/// the home directory.
pub fn resolve_assistant_executable() -> PathBuf {
    if let Ok(path) = std::env::var("CLAUDE_EXECUTABLE") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .map(|home| home.join(".claude/local/claude"))
        .unwrap_or_else(|| PathBuf::from("claude"))
}

/// Locate a named prompt template on disk.
///
/// Tries the development tree next to the executable first, then the
/// installed data directory. Fails fast when neither exists.
pub fn resolve_prompt(name: &str) -> Result<PathBuf> {
    let mut tried = Vec::new();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            // target/{debug,release}/commit-composer -> repo root.
            let dev = exe_dir.join("../../prompts").join(name);
            if dev.exists() {
                return Ok(dev);
            }
            tried.push(dev);

            let beside = exe_dir.join("prompts").join(name);
            if beside.exists() {
                return Ok(beside);
            }
            tried.push(beside);
        }
    }

    if let Some(data) = dirs::data_dir() {
        let installed = data.join("commit-composer/prompts").join(name);
        if installed.exists() {
            return Ok(installed);
        }
        tried.push(installed);
    }

    Err(PipelineError::PromptNotFound {
        name: name.to_string(),
        tried,
    })
}

/// Assistant process configuration: executable, model, tool capabilities,
/// extra writable directories, and diagnostic echo.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub executable: PathBuf,
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub add_dirs: Vec<PathBuf>,
    /// Echo each stream-json event to stderr (pretty-printed when parseable).
    pub echo_events: bool,
}

impl AssistantConfig {
    /// Standard configuration: sonnet model, write-only tool surface, and
    /// `/tmp` plus the working directory as additional writable roots.
    pub fn standard(workdir: &Path) -> Self {
        Self {
            executable: resolve_assistant_executable(),
            model: "sonnet".to_string(),
            allowed_tools: DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(ToString::to_string)
                .collect(),
            disallowed_tools: DEFAULT_DISALLOWED_TOOLS
                .iter()
                .map(ToString::to_string)
                .collect(),
            add_dirs: vec![PathBuf::from("/tmp"), workdir.to_path_buf()],
            echo_events: false,
        }
    }

    /// Check that the configured executable exists on disk.
    pub fn verify_executable(&self) -> Result<()> {
        if self.executable.exists() {
            Ok(())
        } else {
            Err(PipelineError::AssistantNotFound(self.executable.clone()))
        }
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            self.model.clone(),
        ];
        for dir in &self.add_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        for tool in &self.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tool.clone());
        }
        for tool in &self.disallowed_tools {
            args.push("--disallowedTools".to_string());
            args.push(tool.clone());
        }
        args
    }
}

/// Per-invocation behavior knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extract the `result` field from a terminal success record.
    pub capture_result: bool,
    /// Require a well-formed terminal success record.
    pub validate_result: bool,
    /// Echo the composer-produced prompt body to stderr as it is piped.
    pub echo_prompt: bool,
    /// Untracked files the sweep must leave in place (marker files).
    pub allowed_artifacts: Vec<String>,
}

/// Derived result of a completed pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub exit_code: i32,
    pub last_line: Option<String>,
    pub captured_text: String,
}

impl PipelineOutcome {
    /// Parse the authoritative final line, if any.
    pub fn last_event(&self) -> Option<AssistantEvent> {
        self.last_line
            .as_deref()
            .and_then(|line| serde_json::from_str(line).ok())
    }
}

/// Raw capture before validation.
#[derive(Debug)]
struct RawOutcome {
    exit_code: i32,
    last_line: Option<String>,
    assistant_stderr: String,
    composer_stderr: String,
}

enum PromptFeed {
    /// Caller-supplied prompt text written straight to the assistant's stdin.
    Direct(String),
    /// Composer process expanding a template; its stdout is piped across.
    Composer(PathBuf),
}

/// Extract the captured text from a terminal record.
///
/// Yields the `result` field of a non-empty terminal success record, and
/// empty text in every other case. Never an error by itself.
pub fn capture_result(last_line: Option<&str>) -> String {
    last_line
        .and_then(|line| serde_json::from_str::<AssistantEvent>(line).ok())
        .filter(AssistantEvent::is_success)
        .and_then(|event| event.result)
        .filter(|result| !result.is_empty())
        .unwrap_or_default()
}

/// Require a well-formed terminal success record.
pub fn validate_result(last_line: Option<&str>) -> Result<()> {
    let Some(line) = last_line else {
        return Err(PipelineError::NoResponse);
    };

    let event: AssistantEvent =
        serde_json::from_str(line).map_err(|err| PipelineError::InvalidResponse {
            line: line.to_string(),
            reason: err.to_string(),
        })?;

    if event.is_success() {
        Ok(())
    } else {
        Err(PipelineError::ErrorResult {
            message: event
                .result
                .unwrap_or_else(|| "no details provided".to_string()),
        })
    }
}

/// Pipeline driver. One invocation is ever in flight per instance; retries
/// re-run the whole pipeline rather than overlapping a prior attempt.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub assistant: AssistantConfig,
    /// Program that expands a prompt template to final prompt text on stdout.
    pub composer_program: String,
    pub workdir: PathBuf,
}

impl Pipeline {
    pub fn new(assistant: AssistantConfig, workdir: &Path) -> Self {
        Self {
            assistant,
            composer_program: "context-composer".to_string(),
            workdir: workdir.to_path_buf(),
        }
    }

    /// Run the assistant on caller-supplied prompt text.
    pub async fn run_prompt(&self, prompt: &str, opts: &RunOptions) -> Result<PipelineOutcome> {
        self.run_feed(PromptFeed::Direct(prompt.to_string()), opts)
            .await
    }

    /// Resolve a named prompt template and run it through the composer.
    pub async fn run_template(&self, name: &str, opts: &RunOptions) -> Result<PipelineOutcome> {
        let template = resolve_prompt(name)?;
        self.run_composer(&template, opts).await
    }

    /// Run a resolved template through the composer into the assistant.
    pub async fn run_composer(
        &self,
        template: &Path,
        opts: &RunOptions,
    ) -> Result<PipelineOutcome> {
        self.run_feed(PromptFeed::Composer(template.to_path_buf()), opts)
            .await
    }

    /// Run one invocation: snapshot, invoke, sweep, then validate/capture.
    ///
    /// The sweep runs on every exit path. When the before-snapshot itself
    /// fails the sweep is skipped entirely rather than risk deleting files
    /// that predate the invocation.
    async fn run_feed(&self, feed: PromptFeed, opts: &RunOptions) -> Result<PipelineOutcome> {
        let before = match ledger::snapshot(&self.workdir).await {
            Ok(before) => Some(before),
            Err(err) => {
                warn!(error = %err, "could not snapshot untracked files; sweep disabled");
                None
            }
        };

        let start = Utc::now();
        let invoked = self.invoke(feed, opts.echo_prompt).await;
        let duration_ms = (Utc::now() - start).num_milliseconds();

        if let Some(before) = before {
            let allow: Vec<&str> = opts.allowed_artifacts.iter().map(String::as_str).collect();
            ledger::sweep(&self.workdir, &before, &allow).await;
        }

        let raw = invoked?;
        debug!(
            exit_code = raw.exit_code,
            duration_ms,
            last_line = raw.last_line.as_deref().unwrap_or(""),
            "assistant invocation complete"
        );

        if raw.exit_code != 0 {
            return Err(assistant_failure(raw));
        }

        if opts.validate_result {
            validate_result(raw.last_line.as_deref())?;
        }

        let captured_text = if opts.capture_result {
            capture_result(raw.last_line.as_deref())
        } else {
            String::new()
        };

        Ok(PipelineOutcome {
            exit_code: raw.exit_code,
            last_line: raw.last_line,
            captured_text,
        })
    }

    async fn invoke(&self, feed: PromptFeed, echo_prompt: bool) -> Result<RawOutcome> {
        let mut child = Command::new(&self.assistant.executable)
            .args(self.assistant.build_args())
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(PipelineError::AssistantSpawn)?;

        let mut stdin = child.stdin.take();
        let echo = self.assistant.echo_events;
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(collect_lines(out, echo)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, MAX_CAPTURE_BYTES)));

        let mut composer = None;
        let mut composer_err_task = None;
        let feed_task = match feed {
            PromptFeed::Direct(prompt) => {
                let sink = stdin.take();
                tokio::spawn(async move {
                    if let Some(mut sink) = sink {
                        sink.write_all(prompt.as_bytes()).await?;
                        sink.shutdown().await?;
                    }
                    Ok::<(), std::io::Error>(())
                })
            }
            PromptFeed::Composer(template) => {
                let spawned = Command::new(&self.composer_program)
                    .arg(&template)
                    .current_dir(&self.workdir)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn();
                let mut comp = match spawned {
                    Ok(comp) => comp,
                    Err(err) => {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        return Err(PipelineError::ComposerSpawn(err));
                    }
                };
                let source = comp.stdout.take();
                composer_err_task = comp
                    .stderr
                    .take()
                    .map(|err| tokio::spawn(read_bounded(err, MAX_CAPTURE_BYTES)));
                let sink = stdin.take();
                composer = Some(comp);
                tokio::spawn(pump(source, sink, echo_prompt))
            }
        };

        let status = child.wait().await?;

        // The assistant may exit before consuming all input; a broken pipe
        // on the feed side is expected then, not a failure.
        match feed_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "prompt feed ended early"),
            Err(err) => warn!(error = %err, "prompt feed task panicked"),
        }

        let acc = match stdout_task {
            Some(task) => match task.await {
                Ok(Ok(acc)) => acc,
                Ok(Err(err)) => {
                    warn!(error = %err, "assistant stdout capture failed");
                    LineAccumulator::default()
                }
                Err(err) => {
                    warn!(error = %err, "assistant stdout task panicked");
                    LineAccumulator::default()
                }
            },
            None => LineAccumulator::default(),
        };
        let assistant_stderr = join_capture(stderr_task).await;

        let composer_stderr = join_capture(composer_err_task).await;
        if let Some(mut comp) = composer {
            // Composer exit status is not a failure by itself; a broken
            // composer manifests as the assistant producing no valid output.
            match comp.wait().await {
                Ok(status) if !status.success() => {
                    debug!(code = status.code(), "composer exited non-zero");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to reap composer"),
            }
        }

        Ok(RawOutcome {
            exit_code: status.code().unwrap_or(0),
            last_line: acc.last_line().map(ToString::to_string),
            assistant_stderr,
            composer_stderr,
        })
    }
}

/// Aggregate diagnostics for a non-zero assistant exit.
fn assistant_failure(raw: RawOutcome) -> PipelineError {
    let mut detail = String::new();
    if !raw.assistant_stderr.is_empty() {
        detail.push_str(&format!("; stderr: {}", raw.assistant_stderr.trim_end()));
    }
    if !raw.composer_stderr.is_empty() {
        detail.push_str(&format!(
            "; composer stderr: {}",
            raw.composer_stderr.trim_end()
        ));
    }
    if let Some(line) = &raw.last_line {
        detail.push_str(&format!("; last line: {line}"));
    }
    PipelineError::AssistantFailed {
        exit_code: raw.exit_code,
        detail,
    }
}

/// Echo one event line to stderr, pretty-printed when it parses as JSON.
fn echo_event(line: &str) {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => eprintln!("{pretty}"),
            Err(_) => eprintln!("{line}"),
        },
        Err(_) => eprintln!("{line}"),
    }
}

/// Collect the assistant's stdout through a line accumulator.
async fn collect_lines<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    echo: bool,
) -> std::io::Result<LineAccumulator> {
    let mut acc = LineAccumulator::default();
    let mut buf = [0u8; 8192];
    let mut on_line = |line: &str| {
        if echo {
            echo_event(line);
        }
    };
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        acc.push_chunk(&buf[..n], &mut on_line);
    }
    acc.finish(&mut on_line);
    Ok(acc)
}

/// Read a stream to EOF with a byte cap; excess input is drained and dropped.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }
        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }
    Ok(buf)
}

async fn join_capture(
    task: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>,
) -> String {
    match task {
        Some(task) => match task.await {
            Ok(Ok(buf)) => String::from_utf8_lossy(&buf).to_string(),
            Ok(Err(err)) => {
                warn!(error = %err, "stderr capture failed");
                String::new()
            }
            Err(err) => {
                warn!(error = %err, "stderr capture task panicked");
                String::new()
            }
        },
        None => String::new(),
    }
}

/// Forward composer stdout to assistant stdin, closing stdin at EOF.
///
/// With `echo` set, the prompt body is also written to stderr between
/// delimiter lines as it streams past.
async fn pump(
    source: Option<tokio::process::ChildStdout>,
    sink: Option<tokio::process::ChildStdin>,
    echo: bool,
) -> std::io::Result<()> {
    let (Some(mut source), Some(mut sink)) = (source, sink) else {
        return Ok(());
    };
    if echo {
        eprintln!("-----");
    }
    let mut buf = [0u8; 8192];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if echo {
            eprint!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        sink.write_all(&buf[..n]).await?;
    }
    if echo {
        eprintln!("-----");
    }
    sink.shutdown().await?;
    Ok(())
}
