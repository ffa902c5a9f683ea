//! Shared test harness for integration tests.
//!
//! Provides a [`StaticProber`] that answers from a table instead of reading
//! media, and a [`ScriptedRunner`] that plays the role of ffmpeg.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cf_av::ToolOutput;
use cf_core::config::Config;
use cf_pipeline::{Engine, InvocationRunner};
use cf_probe::{AudioStream, MediaDescriptor, Prober, VideoStream};
use tokio_util::sync::CancellationToken;

/// 1080p h264 at 8 Mb/s with stereo aac.
pub fn clip(path: &str, seconds: f64) -> MediaDescriptor {
    MediaDescriptor::new(path, seconds)
        .with_video(
            VideoStream::new("h264", 1920, 1080)
                .with_frame_rate(30.0)
                .with_bitrate(8_000_000),
        )
        .with_audio(AudioStream::new("aac", 48_000, 2).with_bitrate(128_000))
}

/// Known inputs by path. Any other file that exists is described as
/// `produced`, which is how engine outputs get verified.
#[derive(Default)]
pub struct StaticProber {
    known: HashMap<PathBuf, MediaDescriptor>,
    produced: Option<MediaDescriptor>,
}

impl StaticProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: MediaDescriptor) -> Self {
        self.known.insert(descriptor.path.clone(), descriptor);
        self
    }

    pub fn produces(mut self, descriptor: MediaDescriptor) -> Self {
        self.produced = Some(descriptor);
        self
    }
}

impl Prober for StaticProber {
    fn name(&self) -> &'static str {
        "static"
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }

    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        if let Some(d) = self.known.get(path) {
            return Ok(d.clone());
        }
        match (&self.produced, path.exists()) {
            (Some(d), true) => Ok(MediaDescriptor {
                path: path.to_path_buf(),
                ..d.clone()
            }),
            (_, true) => Err(cf_core::Error::unreadable(path, "not a known test file")),
            (_, false) => Err(cf_core::Error::not_found(path)),
        }
    }
}

type Script = Box<dyn Fn(&[String]) -> ToolOutput + Send + Sync>;

/// Stands in for ffmpeg. Successful invocations touch their output file.
pub struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&[String]) -> ToolOutput + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_| exit(0, ""))
    }

    /// Rejects every invocation that stream-copies, like a muxer refusing a
    /// codec tag.
    pub fn rejecting_copy() -> Self {
        Self::new(|args| {
            if copies(args) {
                exit(
                    1,
                    "[mp4 @ 0x1] Could not find tag for codec h264 in stream #0, codec not currently supported in container",
                )
            } else {
                exit(0, "")
            }
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn exit(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        code: Some(code),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

pub fn copies(args: &[String]) -> bool {
    args.windows(2)
        .any(|w| w[0].starts_with("-c") && w[1] == "copy")
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
        self.calls.lock().unwrap().push(args.to_vec());
        let output = (self.script)(args);
        if output.success() {
            if let Some(target) = args.last().filter(|a| a.as_str() != "-") {
                std::fs::write(target, b"media").unwrap();
            }
        }
        Ok(output)
    }
}

/// An engine whose workspaces live under `temp`.
pub fn engine(prober: StaticProber, runner: Arc<ScriptedRunner>, temp: &Path) -> Engine {
    let mut config = Config::default();
    config.supervisor.temp_root = Some(temp.to_path_buf());
    Engine::new(Arc::new(prober), runner, &config)
}

/// True when no workspace directory is left under `temp`.
pub fn no_workspaces_left(temp: &Path) -> bool {
    std::fs::read_dir(temp)
        .map(|entries| {
            entries
                .flatten()
                .all(|e| !e.file_name().to_string_lossy().starts_with("clipforge-"))
        })
        .unwrap_or(true)
}
