//! External tool collaborators.
//!
//! The plan talks to scanners, linters and the remote builder through the
//! traits in this module. The shipped implementations wrap the `trivy`,
//! `hadolint`, `dockle`, `ssh` and `scp` command line tools.

pub mod buildx;
pub mod dockle;
pub mod hadolint;
pub mod trivy;

use std::path::Path;
use std::process::Stdio;

use cranberry_core::error::{CranError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub use buildx::{BuildRequest, RemoteBuilder, SshBuildx};
pub use dockle::{Dockle, DockleDetail, DockleReport, ImageAuditRequest, ImageLinter};
pub use hadolint::{DockerfileLinter, Hadolint, HadolintIssue};
pub use trivy::{
    ScanReport, ScanRequest, ScanTarget, Scanner, Severity, TrivyScanner, Vulnerability,
};

/// Registry credentials handed to a tool.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Captured result of one tool invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A prepared tool invocation.
pub(crate) struct Invocation<'a> {
    tool: &'static str,
    program: &'a Path,
    args: Vec<String>,
    envs: Vec<(&'static str, String)>,
    stdin: Option<String>,
}

impl<'a> Invocation<'a> {
    pub fn new(tool: &'static str, program: &'a Path) -> Self {
        Self {
            tool,
            program,
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
        }
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

    pub fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.envs.push((key, value.into()));
        self
    }

    /// Data written to the child's stdin, then closed.
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is not an error here; only failing to spawn or wait is.
    pub async fn output(self) -> Result<ToolOutput> {
        tracing::debug!(
            tool = self.tool,
            program = %self.program.display(),
            args = ?self.args,
            "Running tool"
        );

        let mut cmd = Command::new(self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            tool_error(
                self.tool,
                format!("Failed to run {}: {}", self.program.display(), e),
            )
        })?;

        if let (Some(data), Some(mut stdin)) = (self.stdin, child.stdin.take()) {
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| tool_error(self.tool, format!("Failed to write stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| tool_error(self.tool, format!("Failed to wait for process: {}", e)))?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Invocation<'_> {
    /// Run to completion, forwarding each output line to the log as it
    /// arrives. Returns the exit code.
    pub async fn stream(self) -> Result<Option<i32>> {
        tracing::debug!(
            tool = self.tool,
            program = %self.program.display(),
            args = ?self.args,
            "Streaming tool"
        );

        let mut child = Command::new(self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tool_error(
                    self.tool,
                    format!("Failed to run {}: {}", self.program.display(), e),
                )
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            forward_lines(self.tool, "stdout", stdout),
            forward_lines(self.tool, "stderr", stderr)
        );

        let status = child
            .wait()
            .await
            .map_err(|e| tool_error(self.tool, format!("Failed to wait for process: {}", e)))?;
        Ok(status.code())
    }
}

async fn forward_lines<R>(tool: &str, stream: &str, reader: Option<R>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(tool, stream, "{}", line);
    }
}

/// Quote a value for a POSIX shell on the remote side of `ssh`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub(crate) fn tool_error(tool: &str, message: impl Into<String>) -> CranError {
    CranError::ToolError {
        tool: tool.to_string(),
        message: message.into(),
    }
}
