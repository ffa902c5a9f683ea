//! Test doubles for the prober and the engine runner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cf_av::ToolOutput;
use cf_probe::{MediaDescriptor, Prober};
use tokio_util::sync::CancellationToken;

use crate::runner::InvocationRunner;

/// Serves fixed descriptors by path. Files it does not know but that exist
/// on disk are described by their contents (`"copy"` or `"encode"`).
#[derive(Default)]
pub struct FakeProber {
    known: HashMap<PathBuf, MediaDescriptor>,
    by_contents: HashMap<String, MediaDescriptor>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, descriptor: MediaDescriptor) -> Self {
        self.known.insert(path.into(), descriptor);
        self
    }

    pub fn produced(mut self, contents: &str, descriptor: MediaDescriptor) -> Self {
        self.by_contents.insert(contents.to_string(), descriptor);
        self
    }
}

impl Prober for FakeProber {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        if let Some(d) = self.known.get(path) {
            return Ok(d.clone());
        }
        let contents = std::fs::read_to_string(path).map_err(|_| cf_core::Error::not_found(path))?;
        self.by_contents
            .get(contents.trim())
            .cloned()
            .map(|d| MediaDescriptor { path: path.to_path_buf(), ..d })
            .ok_or_else(|| cf_core::Error::unreadable(path, "unknown test media"))
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }
}

type Script = Box<dyn Fn(&[String]) -> ToolOutput + Send + Sync>;

/// Records every invocation and answers from a script. Successful runs
/// write their output file, containing `"copy"` when any stream was copied.
pub struct ScriptedRunner {
    script: Script,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&[String]) -> ToolOutput + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every invocation succeeds.
    pub fn succeeding() -> Self {
        Self::new(|_| ok(""))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

pub fn ok(stderr: &str) -> ToolOutput {
    ToolOutput {
        code: Some(0),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

pub fn fail(stderr: &str) -> ToolOutput {
    ToolOutput {
        code: Some(1),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

pub fn copies(args: &[String]) -> bool {
    args.windows(2).any(|w| w[1] == "copy" && w[0].starts_with("-c"))
}

#[async_trait]
impl InvocationRunner for ScriptedRunner {
    async fn run(
        &self,
        args: &[String],
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> cf_core::Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(cf_core::Error::Cancelled);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args.to_vec());
        }
        let output = (self.script)(args);
        if output.success() {
            if let Some(target) = args.last().filter(|a| a.as_str() != "-") {
                let contents = if copies(args) { "copy" } else { "encode" };
                let _ = std::fs::write(target, contents);
            }
        }
        Ok(output)
    }
}
