//! The command-runner trait and the real-process implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use gantry_core::ResourceKey;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Everything a runner needs to execute one command step.
///
/// Environment values are resolved by the time a request is built and may
/// contain secret material, so the `Debug` rendering shows variable names
/// only.
#[derive(Clone)]
pub struct CommandRequest {
    /// The command step's identity.
    pub key: ResourceKey,
    /// Program to execute.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory; the runner's own directory when `None`.
    pub working_dir: Option<PathBuf>,
    /// Environment entries injected on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("key", &self.key)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Captured standard output, exactly as written.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Executes command steps.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs one command to completion. A non-zero exit is an `Err`.
    async fn run(&self, request: CommandRequest) -> Result<CommandOutcome, CommandError>;
}

/// Runs commands as real child processes.
///
/// Both output streams are captured; stdin is closed. The child inherits the
/// parent environment with the request's entries layered on top, and is
/// killed if the owning task is dropped, so a cancelled run leaves no
/// orphaned processes behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutcome, CommandError> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        for (name, value) in &request.env {
            command.env(name, value);
        }

        debug!(step = %request.key, program = %request.program, "spawning command");
        let output = command
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: request.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(CommandOutcome { stdout, stderr })
        } else {
            Err(CommandError::NonZero {
                program: request.program,
                code: output.status.code(),
                stderr: tail(&stderr, 6),
            })
        }
    }
}

/// The last `max_lines` lines of `text`, for compact error messages.
fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
