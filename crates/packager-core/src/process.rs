//! Child process execution with streamed output.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::ProcessError;
use crate::output::OutputSink;

/// Number of output lines kept for failure reports.
pub const LOG_TAIL_LINES: usize = 30;

/// A command to run: program, arguments, extra environment and working dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Relay output lines to the sink while running.
    pub echo: bool,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            echo: true,
        }
    }

    /// `sh -c <command_line>`; the line is passed through untouched.
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(command_line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Text shown in the execution log. For `sh -c` commands this is the
    /// command line itself.
    pub fn display(&self) -> String {
        if self.program == "sh" && self.args.len() == 2 && self.args[0] == "-c" {
            return self.args[1].clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Full captured stdout.
    pub stdout: String,
    /// Last [`LOG_TAIL_LINES`] lines of stdout and stderr, interleaved.
    pub tail: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs child processes. Blocks the caller until the child exits; there is
/// no timeout.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &ShellCommand,
        sink: &dyn OutputSink,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &ShellCommand,
        sink: &dyn OutputSink,
    ) -> Result<ProcessOutput, ProcessError> {
        if command.program.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        debug!(program = %command.program, args = command.args.len(), "Spawning process");
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| not_captured("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_captured("stderr"))?;

        let tail = Mutex::new(VecDeque::with_capacity(LOG_TAIL_LINES));
        let echo = command.echo;
        let (captured, _) = tokio::try_join!(
            relay(stdout, sink, &tail, echo),
            relay(stderr, sink, &tail, echo)
        )?;

        let status = child.wait().await?;
        let tail = tail
            .into_inner()
            .map(Vec::from)
            .unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: captured,
            tail,
        })
    }
}

fn not_captured(stream: &str) -> ProcessError {
    ProcessError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{stream} was not captured"),
    ))
}

async fn relay<R>(
    reader: R,
    sink: &dyn OutputSink,
    tail: &Mutex<VecDeque<String>>,
    echo: bool,
) -> Result<String, ProcessError>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }
        // Compiler output is not guaranteed to be UTF-8.
        let text = String::from_utf8_lossy(&raw);
        let line = text.trim_end_matches(['\n', '\r']).to_string();
        if echo {
            sink.line(&line);
        }
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == LOG_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
