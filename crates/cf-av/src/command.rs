//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Process exit code. `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock time the process ran.
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is spawned with `kill_on_drop`, so a timeout or a cancellation
/// terminates it instead of leaving it running in the background.
///
/// # Example
///
/// ```no_run
/// use cf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> cf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdin_data: Option<Vec<u8>>,
    cancel: Option<CancellationToken>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            stdin_data: None,
            cancel: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Provide data to be written to the process's stdin.
    pub fn stdin(&mut self, data: Vec<u8>) -> &mut Self {
        self.stdin_data = Some(data);
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run the command to completion and return its output regardless of the
    /// exit status.
    ///
    /// # Errors
    ///
    /// - [`cf_core::Error::Timeout`] if the timeout elapses (the child is killed).
    /// - [`cf_core::Error::Cancelled`] if the cancellation token fires (the child is killed).
    /// - [`cf_core::Error::Tool`] if spawning or waiting on the process fails.
    pub async fn run(&self) -> cf_core::Result<ToolOutput> {
        let tool = self.tool_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.stdin_data.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        tracing::debug!(tool = %tool, args = ?self.args, "spawning");
        let started = Instant::now();

        let mut child = cmd
            .spawn()
            .map_err(|e| cf_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        if let Some(ref data) = self.stdin_data {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data).await.map_err(|e| {
                    cf_core::Error::tool(&tool, format!("failed to write stdin: {e}"))
                })?;
            }
        }

        let cancel = self.cancel.clone().unwrap_or_default();

        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|e| {
                cf_core::Error::tool(&tool, format!("I/O error waiting for process: {e}"))
            })?,
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(tool = %tool, timeout = ?self.timeout, "killing process after timeout");
                return Err(cf_core::Error::Timeout { tool, timeout: self.timeout });
            }
            _ = cancel.cancelled() => {
                tracing::info!(tool = %tool, "killing process on cancellation");
                return Err(cf_core::Error::Cancelled);
            }
        };

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            elapsed: started.elapsed(),
        })
    }

    /// Execute the command, failing on a non-zero exit status.
    ///
    /// # Errors
    ///
    /// Everything [`ToolCommand::run`] returns, plus
    /// [`cf_core::Error::EngineFailed`] for a non-zero exit (stderr attached).
    pub async fn execute(&self) -> cf_core::Result<ToolOutput> {
        let output = self.run().await?;
        if !output.success() {
            let stderr = output.stderr.trim().to_string();
            return Err(cf_core::Error::EngineFailed {
                tool: self.tool_name(),
                message: format!(
                    "exited with status {}",
                    output.code.map_or_else(|| "signal".to_string(), |c| c.to_string())
                ),
                stderr,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::ErrorKind;

    #[tokio::test]
    async fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineFailed);
    }

    #[tokio::test]
    async fn run_reports_nonzero_without_error() {
        let Ok(out) = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo boom >&2; exit 3"])
            .run()
            .await
        else {
            return;
        };
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert!(out.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .run()
            .await;
        match result {
            Err(cf_core::Error::Timeout { tool, .. }) => assert_eq!(tool, "sleep"),
            Err(cf_core::Error::Tool { .. }) => {} // no `sleep` binary
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .cancel_on(token)
            .run()
            .await;
        match result {
            Err(cf_core::Error::Cancelled) => {
                assert!(started.elapsed() < Duration::from_secs(5));
            }
            Err(cf_core::Error::Tool { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
