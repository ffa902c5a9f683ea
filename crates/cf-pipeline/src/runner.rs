//! Seam between the supervisor and the external engine process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cf_av::{ToolCommand, ToolOutput, ToolRegistry};
use tokio_util::sync::CancellationToken;

/// Runs one engine invocation.
///
/// Implementations return the captured output whatever the exit status;
/// the supervisor classifies failures. Timeouts and cancellation are errors
/// and must kill the process.
#[async_trait]
pub trait InvocationRunner: Send + Sync {
    /// Tool name used in diagnostics.
    fn tool(&self) -> &str {
        "ffmpeg"
    }

    async fn run(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> cf_core::Result<ToolOutput>;
}

/// Runs invocations with a local ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    path: PathBuf,
}

impl FfmpegRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate ffmpeg through the tool registry.
    pub fn discover(tools: &cf_core::config::ToolsConfig) -> cf_core::Result<Self> {
        let registry = ToolRegistry::discover(tools);
        let tool = registry.require("ffmpeg")?;
        Ok(Self::new(tool.path.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InvocationRunner for FfmpegRunner {
    async fn run(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> cf_core::Result<ToolOutput> {
        ToolCommand::new(self.path.clone())
            .args(args.iter().cloned())
            .timeout(timeout)
            .cancel_on(cancel.clone())
            .run()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn returns_output_of_failing_process() {
        // `false` ignores its arguments and exits 1.
        let runner = FfmpegRunner::new("false");
        let output = runner
            .run(&["-y".to_string()], Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let runner = FfmpegRunner::new("sleep");
        let token = CancellationToken::new();
        token.cancel();
        let err = runner
            .run(&["10".to_string()], Duration::from_secs(30), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cf_core::ErrorKind::Cancelled);
    }
}
