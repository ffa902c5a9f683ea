//! Engine configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! sub-configs for tools, encoding defaults, the execution supervisor, the
//! batch scheduler and the analysis backends. Every section defaults
//! sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub encoding: EncodingConfig,
    pub supervisor: SupervisorConfig,
    pub scheduler: SchedulerConfig,
    pub analyzers: AnalyzersConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, failing on unreadable or
    /// malformed files.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.supervisor.invocation_timeout_secs == 0 {
            warnings.push(
                "supervisor.invocation_timeout_secs is 0; every invocation will time out".into(),
            );
        }

        if self.supervisor.duration_tolerance_secs < 0.0 {
            warnings.push("supervisor.duration_tolerance_secs is negative".into());
        }

        if let Some(ref root) = self.supervisor.temp_root {
            if !root.is_dir() {
                warnings.push(format!(
                    "supervisor.temp_root {} is not an existing directory",
                    root.display()
                ));
            }
        }

        if self.scheduler.workers == Some(0) {
            warnings.push("scheduler.workers is 0; no job would ever run".into());
        }

        if self.encoding.video_crf > 51 {
            warnings.push(format!(
                "encoding.video_crf {} is outside the 0-51 range",
                self.encoding.video_crf
            ));
        }

        let named = [
            ("transcription", &self.analyzers.transcription),
            ("object_detection", &self.analyzers.object_detection),
        ];
        for (name, backend) in named {
            if let Some(cmd) = backend {
                if cmd.program.as_os_str().is_empty() {
                    warnings.push(format!("analyzers.{name}.program is empty"));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Encoder defaults used when a pipeline does not pin codecs explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub video_codec: String,
    pub video_crf: u32,
    pub video_preset: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Geometry applied to concat inputs when the first clip has no video
    /// stream to copy it from.
    pub default_width: u32,
    pub default_height: u32,
    pub default_frame_rate: f64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            video_crf: 23,
            video_preset: "medium".into(),
            pixel_format: "yuv420p".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "192k".into(),
            default_width: 1280,
            default_height: 720,
            default_frame_rate: 30.0,
        }
    }
}

/// Execution supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wall-clock budget for a single engine invocation.
    pub invocation_timeout_secs: u64,
    /// Directory under which per-job workspaces are created. Defaults to the
    /// system temp dir.
    pub temp_root: Option<PathBuf>,
    /// Probe produced files and compare them with the compiled expectations.
    pub verify_output: bool,
    /// Allowed absolute duration drift, in seconds. The effective tolerance
    /// is never below one frame interval of the output.
    pub duration_tolerance_secs: f64,
}

impl SupervisorConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_secs: 3600,
            temp_root: None,
            verify_output: true,
            duration_tolerance_secs: 0.1,
        }
    }
}

/// Batch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size. `None` uses the number of CPUs.
    pub workers: Option<usize>,
    /// Broadcast buffer for job lifecycle events.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            event_capacity: 256,
        }
    }
}

/// External analysis backends. Absent entries surface as
/// `CapabilityUnavailable` when a pipeline asks for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzersConfig {
    pub transcription: Option<AnalyzerCommand>,
    pub object_detection: Option<AnalyzerCommand>,
}

/// An external command that analyzes a media file and prints JSON to stdout.
///
/// `{input}` in `args` is replaced with the analyzed file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
