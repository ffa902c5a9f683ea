//! Analyzer backends for the `analyze` stage.
//!
//! Scene-change and silence detection run through the media engine itself.
//! Transcription and object detection are delegated to external commands
//! configured in [`AnalyzersConfig`]; when none is configured the analyzer
//! is reported as `CapabilityUnavailable`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use cf_av::ToolCommand;
use cf_core::config::{AnalyzerCommand, AnalyzersConfig};
use cf_probe::StreamShape;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::runner::InvocationRunner;
use crate::stage::{parse_scene_times, AnalyzeParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Transcription,
    ObjectDetection,
    SceneChanges,
    Silence,
}

impl AnalyzerKind {
    /// Stream kinds the analyzed slot must carry.
    pub fn requires(self) -> StreamShape {
        match self {
            AnalyzerKind::Transcription | AnalyzerKind::Silence => StreamShape::AUDIO,
            AnalyzerKind::ObjectDetection | AnalyzerKind::SceneChanges => StreamShape::VIDEO,
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalyzerKind::Transcription => "transcription",
            AnalyzerKind::ObjectDetection => "object_detection",
            AnalyzerKind::SceneChanges => "scene_changes",
            AnalyzerKind::Silence => "silence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Seconds into the media.
    pub time: f64,
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// `[x, y, width, height]` in pixels.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

/// Structured analyzer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisData {
    SceneChanges { times: Vec<f64> },
    Silence { intervals: Vec<SilenceInterval> },
    Transcript {
        #[serde(default)]
        language: Option<String>,
        segments: Vec<TranscriptSegment>,
    },
    Detections { detections: Vec<Detection> },
    /// Output of an external analyzer that matched no known shape.
    Raw { value: serde_json::Value },
}

/// One analyzer result, attached to the execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analyzer: AnalyzerKind,
    /// The pipeline slot that was analyzed.
    pub slot: String,
    pub data: AnalysisData,
}

/// What an analyzer is asked to look at.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub path: PathBuf,
    pub params: AnalyzeParams,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    async fn analyze(&self, request: &AnalysisRequest) -> cf_core::Result<AnalysisData>;
}

/// Scene changes via the `scdet` filter.
pub struct SceneAnalyzer {
    runner: Arc<dyn InvocationRunner>,
}

impl SceneAnalyzer {
    pub fn new(runner: Arc<dyn InvocationRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Analyzer for SceneAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::SceneChanges
    }

    async fn analyze(&self, request: &AnalysisRequest) -> cf_core::Result<AnalysisData> {
        let threshold = request.params.threshold.unwrap_or(10.0);
        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            request.path.display().to_string(),
            "-an".into(),
            "-vf".into(),
            format!("scdet=threshold={threshold}"),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        let output = self.runner.run(&args, request.timeout, &request.cancel).await?;
        if !output.success() {
            return Err(cf_av::classify_failure(self.runner.tool(), &output, false));
        }
        Ok(AnalysisData::SceneChanges {
            times: parse_scene_times(&output.stderr),
        })
    }
}

/// Silent intervals via the `silencedetect` filter.
pub struct SilenceAnalyzer {
    runner: Arc<dyn InvocationRunner>,
}

impl SilenceAnalyzer {
    pub fn new(runner: Arc<dyn InvocationRunner>) -> Self {
        Self { runner }
    }
}

static SILENCE_START: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"silence_start:\s*(-?\d+(?:\.\d+)?)").ok());
static SILENCE_END: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"silence_end:\s*(-?\d+(?:\.\d+)?)").ok());

/// Pair up `silence_start`/`silence_end` lines. A trailing start without an
/// end runs to `duration`.
pub fn parse_silence(stderr: &str, duration: Option<f64>) -> Vec<SilenceInterval> {
    let (Some(start_re), Some(end_re)) = (SILENCE_START.as_ref(), SILENCE_END.as_ref()) else {
        return Vec::new();
    };
    let mut intervals = Vec::new();
    let mut open: Option<f64> = None;
    for line in stderr.lines() {
        if let Some(t) = start_re.captures(line).and_then(|c| c[1].parse::<f64>().ok()) {
            open = Some(t.max(0.0));
        }
        if let Some(t) = end_re.captures(line).and_then(|c| c[1].parse::<f64>().ok()) {
            if let Some(start) = open.take() {
                intervals.push(SilenceInterval { start, end: t });
            }
        }
    }
    if let (Some(start), Some(end)) = (open, duration) {
        if end > start {
            intervals.push(SilenceInterval { start, end });
        }
    }
    intervals
}

#[async_trait]
impl Analyzer for SilenceAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Silence
    }

    async fn analyze(&self, request: &AnalysisRequest) -> cf_core::Result<AnalysisData> {
        let noise = request.params.threshold.unwrap_or(-30.0);
        let min = request.params.min_duration.unwrap_or(0.5);
        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            request.path.display().to_string(),
            "-vn".into(),
            "-af".into(),
            format!("silencedetect=noise={noise}dB:d={min}"),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        let output = self.runner.run(&args, request.timeout, &request.cancel).await?;
        if !output.success() {
            return Err(cf_av::classify_failure(self.runner.tool(), &output, false));
        }
        Ok(AnalysisData::Silence {
            intervals: parse_silence(&output.stderr, None),
        })
    }
}

/// An external program that prints JSON on stdout.
pub struct CommandAnalyzer {
    kind: AnalyzerKind,
    command: AnalyzerCommand,
}

impl CommandAnalyzer {
    pub fn new(kind: AnalyzerKind, command: AnalyzerCommand) -> Self {
        Self { kind, command }
    }

    fn args(&self, request: &AnalysisRequest) -> Vec<String> {
        let input = request.path.display().to_string();
        let language = request.params.language.clone().unwrap_or_default();
        let mut args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{language}", &language))
            .collect();
        if !self.command.args.iter().any(|a| a.contains("{input}")) {
            args.push(input);
        }
        args
    }
}

/// Interpret analyzer stdout for `kind`, falling back to raw JSON.
pub fn parse_command_output(kind: AnalyzerKind, stdout: &str) -> cf_core::Result<AnalysisData> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        cf_core::Error::tool(kind.to_string(), format!("analyzer printed invalid JSON: {e}"))
    })?;

    let parsed = match kind {
        AnalyzerKind::Transcription => {
            let language = value.get("language").and_then(|l| l.as_str()).map(str::to_string);
            value
                .get("segments")
                .cloned()
                .and_then(|s| serde_json::from_value::<Vec<TranscriptSegment>>(s).ok())
                .map(|segments| AnalysisData::Transcript { language, segments })
        }
        AnalyzerKind::ObjectDetection => value
            .get("detections")
            .cloned()
            .or_else(|| value.is_array().then(|| value.clone()))
            .and_then(|d| serde_json::from_value::<Vec<Detection>>(d).ok())
            .map(|detections| AnalysisData::Detections { detections }),
        _ => None,
    };
    Ok(parsed.unwrap_or(AnalysisData::Raw { value }))
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    async fn analyze(&self, request: &AnalysisRequest) -> cf_core::Result<AnalysisData> {
        let timeout = self
            .command
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(request.timeout);
        let output = ToolCommand::new(self.command.program.clone())
            .args(self.args(request))
            .timeout(timeout)
            .cancel_on(request.cancel.clone())
            .execute()
            .await?;
        parse_command_output(self.kind, &output.stdout)
    }
}

/// Analyzers available to the supervisor, by kind.
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<AnalyzerKind, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in engine analyzers plus the configured external commands.
    pub fn from_config(config: &AnalyzersConfig, runner: Arc<dyn InvocationRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SceneAnalyzer::new(runner.clone())));
        registry.register(Arc::new(SilenceAnalyzer::new(runner)));
        if let Some(cmd) = &config.transcription {
            registry.register(Arc::new(CommandAnalyzer::new(AnalyzerKind::Transcription, cmd.clone())));
        }
        if let Some(cmd) = &config.object_detection {
            registry.register(Arc::new(CommandAnalyzer::new(AnalyzerKind::ObjectDetection, cmd.clone())));
        }
        registry
    }

    /// Register an analyzer, replacing any previous one of the same kind.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.kind(), analyzer);
    }

    pub fn get(&self, kind: AnalyzerKind) -> cf_core::Result<Arc<dyn Analyzer>> {
        self.analyzers.get(&kind).cloned().ok_or_else(|| {
            cf_core::Error::CapabilityUnavailable(format!("no {kind} analyzer is configured"))
        })
    }

    pub fn kinds(&self) -> Vec<AnalyzerKind> {
        let mut kinds: Vec<AnalyzerKind> = self.analyzers.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_av::ToolOutput;

    struct Canned(String);

    #[async_trait]
    impl InvocationRunner for Canned {
        async fn run(
            &self,
            _args: &[String],
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> cf_core::Result<ToolOutput> {
            Ok(ToolOutput {
                code: Some(0),
                stderr: self.0.clone(),
                ..Default::default()
            })
        }
    }

    fn request(kind: AnalyzerKind) -> AnalysisRequest {
        AnalysisRequest {
            path: PathBuf::from("/media/in.mp4"),
            params: AnalyzeParams::new(kind),
            timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn silence_intervals_pair_up() {
        let stderr = "\
[silencedetect @ 0x1] silence_start: 1.5
[silencedetect @ 0x1] silence_end: 3.25 | silence_duration: 1.75
[silencedetect @ 0x1] silence_start: 8
";
        let intervals = parse_silence(stderr, Some(10.0));
        assert_eq!(
            intervals,
            vec![
                SilenceInterval { start: 1.5, end: 3.25 },
                SilenceInterval { start: 8.0, end: 10.0 },
            ]
        );
    }

    #[test]
    fn transcript_output_is_typed() {
        let stdout = r#"{"language": "en", "segments": [{"start": 0.0, "end": 2.5, "text": "hello"}]}"#;
        match parse_command_output(AnalyzerKind::Transcription, stdout).unwrap() {
            AnalysisData::Transcript { language, segments } => {
                assert_eq!(language.as_deref(), Some("en"));
                assert_eq!(segments[0].text, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_shape_falls_back_to_raw() {
        let data = parse_command_output(AnalyzerKind::ObjectDetection, r#"{"frames": 3}"#).unwrap();
        assert!(matches!(data, AnalysisData::Raw { .. }));
        assert!(parse_command_output(AnalyzerKind::ObjectDetection, "not json").is_err());
    }

    #[test]
    fn command_args_substitute_placeholders() {
        let analyzer = CommandAnalyzer::new(
            AnalyzerKind::Transcription,
            AnalyzerCommand {
                program: PathBuf::from("whisper-json"),
                args: vec!["--lang".into(), "{language}".into(), "{input}".into()],
                timeout_secs: None,
            },
        );
        let mut req = request(AnalyzerKind::Transcription);
        req.params.language = Some("de".into());
        assert_eq!(analyzer.args(&req), vec!["--lang", "de", "/media/in.mp4"]);
    }

    #[test]
    fn missing_backend_is_capability_unavailable() {
        let registry = AnalyzerRegistry::from_config(&AnalyzersConfig::default(), Arc::new(Canned(String::new())));
        let err = registry.get(AnalyzerKind::Transcription).err().unwrap();
        assert_eq!(err.kind(), cf_core::ErrorKind::CapabilityUnavailable);
        assert!(registry.get(AnalyzerKind::Silence).is_ok());
    }

    #[tokio::test]
    async fn scene_analyzer_reads_scdet_lines() {
        let runner = Arc::new(Canned("lavfi.scdet.score: 40, lavfi.scdet.time: 2.5\n".into()));
        let data = SceneAnalyzer::new(runner)
            .analyze(&request(AnalyzerKind::SceneChanges))
            .await
            .unwrap();
        assert_eq!(data, AnalysisData::SceneChanges { times: vec![2.5] });
    }
}
