//! The compiled, engine-ready form of a pipeline.
//!
//! A [`Program`] is an ordered list of [`Step`]s. Paths inside it are
//! templates relative to `{workspace}`, and measured values are referenced
//! by name (`{loudnorm_3}`), so compiling the same pipeline twice yields
//! equal programs. The supervisor fills the templates in at execution time.

use std::path::PathBuf;

use cf_av::TemplateContext;
use serde::Serialize;

use crate::analysis::AnalyzerKind;
use crate::graph::StreamKind;
use crate::stage::AnalyzeParams;

/// How copy-eligible streams are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Eligible streams are stream-copied.
    Copy,
    /// Every stream is encoded.
    Encode,
}

/// One input file of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSpec {
    pub path: String,
    /// Input seek (`-ss`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek: Option<f64>,
    /// Input end position (`-to`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<f64>,
    /// Forced demuxer (`-f concat`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl InputSpec {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            seek: None,
            until: None,
            format: None,
            options: Vec::new(),
        }
    }
}

/// One mapped output stream and how to produce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStream {
    pub kind: StreamKind,
    /// `-map` argument: `0:v:0` for an input stream, `[v3]` for a graph label.
    pub map: String,
    /// The stream reaches the output untouched and may be stream-copied.
    pub copy_eligible: bool,
    /// Encoder arguments used when the stream is not copied.
    pub encode: Vec<String>,
}

impl OutputStream {
    fn codec_args(&self, mode: RenderMode) -> Vec<String> {
        if mode == RenderMode::Copy && self.copy_eligible {
            vec![self.kind.codec_flag().to_string(), "copy".to_string()]
        } else {
            self.encode.clone()
        }
    }
}

/// A single external engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub label: String,
    pub inputs: Vec<InputSpec>,
    /// Filter chains, joined with `;` into `-filter_complex`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter_graph: Vec<String>,
    pub streams: Vec<OutputStream>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_options: Vec<String>,
    /// Forced muxer (`-f null` for measurement passes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub output: String,
}

impl Invocation {
    /// Whether any stream would be stream-copied in `mode`.
    pub fn uses_copy(&self, mode: RenderMode) -> bool {
        mode == RenderMode::Copy && self.streams.iter().any(|s| s.copy_eligible)
    }

    /// Render the full argument vector, substituting templates.
    pub fn render(&self, mode: RenderMode, vars: &TemplateContext) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for input in &self.inputs {
            if let Some(seek) = input.seek {
                args.push("-ss".into());
                args.push(format_seconds(seek));
            }
            if let Some(until) = input.until {
                args.push("-to".into());
                args.push(format_seconds(until));
            }
            if let Some(format) = &input.format {
                args.push("-f".into());
                args.push(format.clone());
            }
            args.extend(input.options.iter().cloned());
            args.push("-i".into());
            args.push(vars.substitute(&input.path));
        }

        if !self.filter_graph.is_empty() {
            args.push("-filter_complex".into());
            args.push(vars.substitute(&self.filter_graph.join(";")));
        }

        for stream in &self.streams {
            args.push("-map".into());
            args.push(stream.map.clone());
        }
        for stream in &self.streams {
            args.extend(stream.codec_args(mode));
        }

        args.extend(self.output_options.iter().cloned());
        if let Some(format) = &self.format {
            args.push("-f".into());
            args.push(format.clone());
        }
        args.push(vars.substitute(&self.output));
        args
    }
}

/// Scene detection followed by one file per scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSplitPlan {
    pub label: String,
    pub source: String,
    /// `scdet` threshold on its 0-100 scale.
    pub threshold: f64,
    pub min_scene_seconds: f64,
    /// Estimated source duration, used when the source cannot be probed.
    pub expected_duration: f64,
    /// Workspace-relative directory the segments are written to.
    pub directory: String,
    pub extension: String,
    pub video_encode: Vec<String>,
    /// Empty when the source has no audio.
    pub audio_encode: Vec<String>,
    pub has_audio: bool,
    /// The source holds its original streams, so segments may be copied.
    pub copy_eligible: bool,
}

impl SceneSplitPlan {
    /// Arguments cutting `[start, end)` of the source into `output`.
    pub fn segment_args(
        &self,
        source: &str,
        start: f64,
        end: f64,
        output: &str,
        mode: RenderMode,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-ss".into(),
            format_seconds(start),
            "-to".into(),
            format_seconds(end),
            "-i".into(),
            source.to_string(),
            "-map".into(),
            "0:v:0".into(),
        ];
        if self.has_audio {
            args.push("-map".into());
            args.push("0:a:0".into());
        }
        match mode {
            RenderMode::Copy => {
                args.extend(["-c".to_string(), "copy".to_string()]);
            }
            RenderMode::Encode => {
                args.extend(self.video_encode.iter().cloned());
                if self.has_audio {
                    args.extend(self.audio_encode.iter().cloned());
                }
            }
        }
        args.push(output.to_string());
        args
    }

    /// Arguments for the detection pass.
    pub fn detect_args(&self, source: &str) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            source.to_string(),
            "-an".into(),
            "-vf".into(),
            format!("scdet=threshold={}", self.threshold),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]
    }
}

/// An analyzer run against a materialized slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPlan {
    pub label: String,
    pub slot: String,
    pub source: String,
    pub analyzer: AnalyzerKind,
    pub params: AnalyzeParams,
}

/// One step of a [`Program`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// A media-producing engine invocation.
    Encode(Invocation),
    /// First pass of loudness normalization. The parsed measurement is
    /// stored under `var` for the second pass.
    MeasureLoudness { invocation: Invocation, var: String },
    SplitScenes(SceneSplitPlan),
    Analyze(AnalysisPlan),
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Step::Encode(inv) => &inv.label,
            Step::MeasureLoudness { invocation, .. } => &invocation.label,
            Step::SplitScenes(plan) => &plan.label,
            Step::Analyze(plan) => &plan.label,
        }
    }

    /// Whether this step relies on stream copy in `mode`.
    pub fn uses_copy(&self, mode: RenderMode) -> bool {
        match self {
            Step::Encode(inv) => inv.uses_copy(mode),
            Step::SplitScenes(plan) => mode == RenderMode::Copy && plan.copy_eligible,
            Step::MeasureLoudness { .. } | Step::Analyze(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Directory,
}

/// A path created inside the workspace during execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporaryArtifact {
    /// Path relative to the workspace.
    pub name: String,
    pub kind: ArtifactKind,
    /// Contents written before the first step runs (concat lists).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

/// Where the result of a program ends up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgramOutput {
    File { artifact: String, destination: PathBuf },
    Directory { artifact: String, destination: PathBuf },
    /// Analysis-only program.
    None,
}

/// Properties the final output is checked against after execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Expectations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate_cap: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_cap: Option<u64>,
}

/// A compiled pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub steps: Vec<Step>,
    pub artifacts: Vec<TemporaryArtifact>,
    pub output: ProgramOutput,
    /// Index of the step that writes the final output.
    pub output_step: Option<usize>,
    /// At least one step can run with stream copy.
    pub copy_eligible: bool,
    pub expected: Expectations,
}

impl Program {
    pub fn invocation_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s, Step::Analyze(_)))
            .count()
    }
}

/// Seconds with millisecond precision, trailing zeros trimmed.
pub fn format_seconds(secs: f64) -> String {
    let s = format!("{secs:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn invocation() -> Invocation {
        Invocation {
            label: "final".into(),
            inputs: vec![InputSpec {
                seek: Some(30.0),
                until: Some(90.0),
                ..InputSpec::file("/media/in.mp4")
            }],
            filter_graph: vec!["[0:a:0]volume=6dB[a0]".into()],
            streams: vec![
                OutputStream {
                    kind: StreamKind::Video,
                    map: "0:v:0".into(),
                    copy_eligible: true,
                    encode: vec!["-c:v".into(), "libx264".into()],
                },
                OutputStream {
                    kind: StreamKind::Audio,
                    map: "[a0]".into(),
                    copy_eligible: false,
                    encode: vec!["-c:a".into(), "aac".into()],
                },
            ],
            output_options: vec!["-movflags".into(), "+faststart".into()],
            format: None,
            output: "{workspace}/final.mp4".into(),
        }
    }

    #[test]
    fn render_copy_mode() {
        let vars = TemplateContext::new().with_workspace(Path::new("/tmp/ws"));
        let args = invocation().render(RenderMode::Copy, &vars);
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-nostdin", "-y", "-ss", "30", "-to", "90", "-i",
                "/media/in.mp4", "-filter_complex", "[0:a:0]volume=6dB[a0]", "-map",
                "0:v:0", "-map", "[a0]", "-c:v", "copy", "-c:a", "aac", "-movflags",
                "+faststart", "/tmp/ws/final.mp4",
            ]
        );
    }

    #[test]
    fn render_encode_mode_never_copies() {
        let args = invocation().render(RenderMode::Encode, &TemplateContext::new());
        assert!(!args.iter().any(|a| a == "copy"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert_eq!(args.last().map(String::as_str), Some("{workspace}/final.mp4"));
    }

    #[test]
    fn copy_usage_depends_on_mode() {
        let inv = invocation();
        assert!(inv.uses_copy(RenderMode::Copy));
        assert!(!inv.uses_copy(RenderMode::Encode));
        assert!(Step::Encode(inv).uses_copy(RenderMode::Copy));
    }

    #[test]
    fn seconds_formatting() {
        assert_eq!(format_seconds(30.0), "30");
        assert_eq!(format_seconds(1.5), "1.5");
        assert_eq!(format_seconds(0.0), "0");
        assert_eq!(format_seconds(12.3456), "12.346");
    }
}
