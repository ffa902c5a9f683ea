//! Executes compiled programs.
//!
//! The supervisor runs a [`Program`] at most twice. A copy-eligible program
//! first runs with stream copy; when that attempt is rejected by the engine
//! or its output misses the compiled expectations, one re-encoding attempt
//! follows. It resumes at the failing step when no earlier step copied, and
//! reruns everything otherwise. Scene splits retry single segments instead.
//!
//! Every run owns a [`Workspace`]. Outputs are published from it only on
//! success and it is released whichever way the run ended.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cf_av::{classify_failure, TemplateContext, ToolOutput, Workspace};
use cf_core::config::SupervisorConfig;
use cf_probe::{MediaDescriptor, Prober};
use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisReport, AnalysisRequest, AnalyzerRegistry};
use crate::program::{
    AnalysisPlan, ArtifactKind, Program, ProgramOutput, RenderMode, SceneSplitPlan, Step,
};
use crate::result::{Diagnostic, ExecutionResult, ExecutionStatus, Severity, Strategy};
use crate::runner::InvocationRunner;
use crate::stage::{parse_measurement, parse_scene_times, scenes};

/// Allowed overshoot of a bitrate cap.
const BITRATE_SLACK: f64 = 1.05;

/// A step error together with the step it came from.
struct StepFailure {
    index: usize,
    error: cf_core::Error,
}

/// Runs programs against an engine runner.
pub struct Supervisor {
    runner: Arc<dyn InvocationRunner>,
    prober: Arc<dyn Prober>,
    analyzers: Arc<AnalyzerRegistry>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        runner: Arc<dyn InvocationRunner>,
        prober: Arc<dyn Prober>,
        analyzers: Arc<AnalyzerRegistry>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            runner,
            prober,
            analyzers,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Execute `program`. `label` names the workspace directory.
    ///
    /// Never returns an error: failures are reported in the result together
    /// with the strategies that were attempted.
    pub async fn execute(
        &self,
        program: &Program,
        label: &str,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut result = self.execute_inner(program, label, &cancel).await;
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        match result.status {
            ExecutionStatus::Failed => tracing::warn!(
                job = label,
                kind = ?result.error_kind(),
                attempted = ?result.attempted,
                "program failed"
            ),
            status => tracing::info!(
                job = label,
                %status,
                attempted = ?result.attempted,
                elapsed_ms = result.elapsed_ms,
                "program finished"
            ),
        }
        result
    }

    async fn execute_inner(&self, program: &Program, label: &str, cancel: &CancellationToken) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::failed(&cf_core::Error::Cancelled, Vec::new());
        }

        let workspace = match Workspace::create(self.config.temp_root.as_deref(), label) {
            Ok(ws) => ws,
            Err(e) => return ExecutionResult::failed(&e, Vec::new()),
        };

        let mut run = Run {
            supervisor: self,
            program,
            workspace: &workspace,
            vars: TemplateContext::new().with_workspace(workspace.path()),
            cancel,
            diagnostics: Vec::new(),
            analyses: Vec::new(),
            partial_fallback: false,
        };

        let mut attempted = Vec::new();
        let outcome = match run.prepare() {
            Ok(()) => run.attempts(&mut attempted).await,
            Err(error) => Err(StepFailure { index: 0, error }),
        };
        if run.partial_fallback && !attempted.contains(&Strategy::PartialReencode) {
            attempted.push(Strategy::PartialReencode);
        }

        let published = match outcome {
            Ok(()) => run.publish().map_err(|error| StepFailure {
                index: program.output_step.unwrap_or(0),
                error,
            }),
            Err(failure) => Err(failure),
        };

        let Run {
            mut diagnostics,
            analyses,
            ..
        } = run;

        let mut result = match published {
            Ok((output_path, outputs)) => ExecutionResult {
                status: if attempted.len() > 1 {
                    ExecutionStatus::FallbackSuccess
                } else {
                    ExecutionStatus::Success
                },
                output_path,
                outputs,
                diagnostics: Vec::new(),
                attempted,
                analyses: analyses.into_iter().map(|(_, report)| report).collect(),
                elapsed_ms: 0,
            },
            Err(StepFailure { index, error }) => {
                let mut failed = ExecutionResult::failed(&error, attempted);
                if let Some(step) = program.steps.get(index) {
                    failed.diagnostics = failed
                        .diagnostics
                        .into_iter()
                        .map(|d| d.at_step(step.label()))
                        .collect();
                }
                failed
            }
        };

        if let Err(e) = workspace.release() {
            diagnostics.push(Diagnostic::from_error(&e, Severity::Warning));
        }
        diagnostics.append(&mut result.diagnostics);
        result.diagnostics = diagnostics;
        result
    }
}

/// State of one program execution.
struct Run<'a> {
    supervisor: &'a Supervisor,
    program: &'a Program,
    workspace: &'a Workspace,
    vars: TemplateContext,
    cancel: &'a CancellationToken,
    diagnostics: Vec<Diagnostic>,
    /// Reports keyed by the index of the step that produced them.
    analyses: Vec<(usize, AnalysisReport)>,
    /// A scene segment fell back to encoding.
    partial_fallback: bool,
}

impl Run<'_> {
    /// Write list artifacts and create artifact directories.
    fn prepare(&self) -> cf_core::Result<()> {
        for artifact in &self.program.artifacts {
            match (&artifact.kind, &artifact.contents) {
                (ArtifactKind::File, Some(contents)) => {
                    self.workspace.write_artifact(&artifact.name, contents)?;
                }
                (ArtifactKind::Directory, _) => {
                    self.workspace.artifact_dir(&artifact.name)?;
                }
                (ArtifactKind::File, None) => {}
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> cf_core::Result<()> {
        if self.cancel.is_cancelled() {
            Err(cf_core::Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn attempts(&mut self, attempted: &mut Vec<Strategy>) -> Result<(), StepFailure> {
        let program = self.program;
        let fast = program.copy_eligible;
        let (mode, strategy) = if fast {
            (RenderMode::Copy, Strategy::StreamCopy)
        } else {
            (RenderMode::Encode, Strategy::Reencode)
        };

        self.check_cancelled().map_err(|error| StepFailure { index: 0, error })?;
        attempted.push(strategy);
        tracing::info!(?strategy, steps = program.steps.len(), "attempt started");

        let rejected = match self.steps(0, mode).await {
            Ok(()) => match self.verify().await {
                Ok(()) => return Ok(()),
                Err(miss) if fast => StepFailure {
                    index: program.output_step.unwrap_or(0),
                    error: miss,
                },
                Err(miss) => {
                    self.warn(&miss, program.output_step);
                    return Ok(());
                }
            },
            Err(failure) if fast && failure.error.is_recoverable() => failure,
            Err(failure) => return Err(failure),
        };

        let restart = if program.steps[..rejected.index]
            .iter()
            .any(|s| s.uses_copy(RenderMode::Copy))
        {
            0
        } else {
            rejected.index
        };
        let strategy = if restart == 0 {
            Strategy::Reencode
        } else {
            Strategy::PartialReencode
        };
        tracing::info!(
            ?strategy,
            step = program.steps.get(rejected.index).map(Step::label).unwrap_or_default(),
            reason = %rejected.error,
            "stream copy rejected, falling back"
        );
        self.warn(&rejected.error, Some(rejected.index));

        self.check_cancelled().map_err(|error| StepFailure { index: restart, error })?;
        attempted.push(strategy);
        self.analyses.retain(|(index, _)| *index < restart);

        self.steps(restart, RenderMode::Encode).await?;
        if let Err(miss) = self.verify().await {
            self.warn(&miss, program.output_step);
        }
        Ok(())
    }

    fn warn(&mut self, error: &cf_core::Error, step: Option<usize>) {
        let mut diagnostic = Diagnostic::from_error(error, Severity::Warning);
        if let Some(step) = step.and_then(|i| self.program.steps.get(i)) {
            diagnostic = diagnostic.at_step(step.label());
        }
        self.diagnostics.push(diagnostic);
    }

    async fn steps(&mut self, from: usize, mode: RenderMode) -> Result<(), StepFailure> {
        let program = self.program;
        for (index, step) in program.steps.iter().enumerate().skip(from) {
            let outcome = match self.check_cancelled() {
                Ok(()) => self.step(index, step, mode).await,
                Err(e) => Err(e),
            };
            outcome.map_err(|error| StepFailure { index, error })?;
        }
        Ok(())
    }

    async fn step(&mut self, index: usize, step: &Step, mode: RenderMode) -> cf_core::Result<()> {
        tracing::debug!(step = step.label(), ?mode, "running step");
        match step {
            Step::Encode(invocation) => {
                let args = invocation.render(mode, &self.vars);
                self.invoke(&args, invocation.uses_copy(mode)).await?;
            }
            Step::MeasureLoudness { invocation, var } => {
                let args = invocation.render(RenderMode::Encode, &self.vars);
                let output = self.invoke(&args, false).await?;
                let measured = parse_measurement(&output.stderr)?;
                tracing::debug!(var = %var, %measured, "loudness measured");
                self.vars.set(var, &measured);
            }
            Step::SplitScenes(plan) => self.split(plan, mode).await?,
            Step::Analyze(plan) => self.analyze(index, plan).await?,
        }
        Ok(())
    }

    /// Run the engine and classify a non-zero exit.
    async fn invoke(&self, args: &[String], speculative: bool) -> cf_core::Result<ToolOutput> {
        let supervisor = self.supervisor;
        let tool = supervisor.runner.tool();
        tracing::trace!(tool, args = %args.join(" "), "invoking engine");
        let output = supervisor
            .runner
            .run(args, supervisor.config.invocation_timeout(), self.cancel)
            .await?;
        if !output.success() {
            return Err(classify_failure(tool, &output, speculative));
        }
        Ok(output)
    }

    async fn probe(&self, path: PathBuf) -> cf_core::Result<MediaDescriptor> {
        let prober = self.supervisor.prober.clone();
        tokio::task::spawn_blocking(move || prober.probe(&path))
            .await
            .map_err(|e| cf_core::Error::Internal(format!("probe task failed: {e}")))?
    }

    async fn split(&mut self, plan: &SceneSplitPlan, mode: RenderMode) -> cf_core::Result<()> {
        let source = self.vars.substitute(&plan.source);
        let detection = self.invoke(&plan.detect_args(&source), false).await?;
        let cuts = parse_scene_times(&detection.stderr);

        let duration = match self.probe(PathBuf::from(&source)).await {
            Ok(d) if d.duration_seconds > 0.0 => d.duration_seconds,
            _ => plan.expected_duration,
        };
        let list = scenes(&cuts, duration, plan.min_scene_seconds);
        tracing::info!(step = %plan.label, cuts = cuts.len(), scenes = list.len(), "scenes detected");

        let directory = self.workspace.artifact_dir(&plan.directory)?;
        for scene in &list {
            self.check_cancelled()?;
            let output = directory.join(scene.file_name(&plan.extension)).display().to_string();
            let encode = plan.segment_args(&source, scene.start, scene.end, &output, RenderMode::Encode);
            if mode == RenderMode::Encode || !plan.copy_eligible {
                self.invoke(&encode, false).await?;
                continue;
            }

            let copy = plan.segment_args(&source, scene.start, scene.end, &output, RenderMode::Copy);
            match self.invoke(&copy, true).await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    tracing::info!(scene = scene.number, reason = %e, "segment copy rejected, encoding");
                    self.warn(&e, None);
                    self.partial_fallback = true;
                    // The segment encode is already the fallback.
                    self.invoke(&encode, false).await.map_err(settled)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn analyze(&mut self, index: usize, plan: &AnalysisPlan) -> cf_core::Result<()> {
        let supervisor = self.supervisor;
        let request = AnalysisRequest {
            path: PathBuf::from(self.vars.substitute(&plan.source)),
            params: plan.params.clone(),
            timeout: supervisor.config.invocation_timeout(),
            cancel: self.cancel.clone(),
        };

        let outcome = match supervisor.analyzers.get(plan.analyzer) {
            Ok(analyzer) => analyzer.analyze(&request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(data) => {
                self.analyses.push((
                    index,
                    AnalysisReport {
                        analyzer: plan.analyzer,
                        slot: plan.slot.clone(),
                        data,
                    },
                ));
                Ok(())
            }
            Err(e @ (cf_core::Error::Cancelled | cf_core::Error::Timeout { .. })) => Err(e),
            Err(e) if plan.params.optional => {
                tracing::warn!(step = %plan.label, error = %e, "optional analysis skipped");
                self.warn(&e, Some(index));
                Ok(())
            }
            // Re-encoding cannot help an analyzer.
            Err(cf_core::Error::EngineRejected { tool, message, stderr }) => {
                Err(cf_core::Error::EngineFailed { tool, message, stderr })
            }
            Err(e) => Err(e),
        }
    }

    /// Compare the produced output with the program's expectations.
    async fn verify(&self) -> cf_core::Result<()> {
        let supervisor = self.supervisor;
        if !supervisor.config.verify_output {
            return Ok(());
        }
        let miss = |message: String| cf_core::Error::EngineRejected {
            tool: "verify".into(),
            message,
            stderr: String::new(),
        };

        match &self.program.output {
            ProgramOutput::None => Ok(()),
            ProgramOutput::Directory { artifact, .. } => {
                let count = std::fs::read_dir(self.workspace.artifact(artifact))?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_file())
                    .count();
                if count == 0 {
                    return Err(miss("scene split produced no files".into()));
                }
                Ok(())
            }
            ProgramOutput::File { artifact, .. } => {
                let produced = self
                    .probe(self.workspace.artifact(artifact))
                    .await
                    .map_err(|e| miss(format!("output cannot be probed: {e}")))?;
                let expected = &self.program.expected;

                if let Some(duration) = expected.duration {
                    let tolerance = supervisor
                        .config
                        .duration_tolerance_secs
                        .max(expected.frame_interval.unwrap_or(0.0));
                    let drift = (produced.duration_seconds - duration).abs();
                    if drift > tolerance {
                        return Err(miss(format!(
                            "output lasts {:.3}s, expected {duration:.3}s",
                            produced.duration_seconds
                        )));
                    }
                }

                let caps = [
                    (expected.video_bitrate_cap, produced.primary_video().and_then(|v| v.bitrate), "video"),
                    (expected.audio_bitrate_cap, produced.primary_audio().and_then(|a| a.bitrate), "audio"),
                ];
                for (cap, actual, kind) in caps {
                    if let (Some(cap), Some(actual)) = (cap, actual) {
                        if actual as f64 > cap as f64 * BITRATE_SLACK {
                            return Err(miss(format!("{kind} bitrate {actual} exceeds cap {cap}")));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Move the output out of the workspace.
    fn publish(&self) -> cf_core::Result<(Option<PathBuf>, Vec<PathBuf>)> {
        match &self.program.output {
            ProgramOutput::None => Ok((None, Vec::new())),
            ProgramOutput::File { artifact, destination } => {
                let path = self.workspace.publish_file(artifact, destination)?;
                Ok((Some(path.clone()), vec![path]))
            }
            ProgramOutput::Directory { artifact, destination } => {
                let files = self.workspace.publish_dir(artifact, destination)?;
                Ok((Some(destination.clone()), files))
            }
        }
    }
}

/// A rejection from an encode that was itself a fallback is final.
fn settled(error: cf_core::Error) -> cf_core::Error {
    match error {
        cf_core::Error::EngineRejected { tool, message, stderr } => {
            cf_core::Error::EngineFailed { tool, message, stderr }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use cf_core::config::EncodingConfig;
    use cf_core::ErrorKind;

    use crate::analysis::AnalyzerKind;
    use crate::compiler::Compiler;
    use crate::pipeline::{Pipeline, StageNode};
    use crate::stage::{fixtures, AnalyzeParams, FadeParams, Stage, TimeSpec, TrimParams};
    use crate::testing::{copies, fail, ok, FakeProber, ScriptedRunner};

    struct Harness {
        temp: tempfile::TempDir,
        prober: Arc<FakeProber>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_prober(
                FakeProber::new()
                    .with("/media/a.mp4", fixtures::av(120.0))
                    .produced("copy", fixtures::av(60.0))
                    .produced("encode", fixtures::av(60.0)),
            )
        }

        fn with_prober(prober: FakeProber) -> Self {
            let temp = tempfile::tempdir().unwrap();
            std::fs::create_dir(temp.path().join("work")).unwrap();
            Self {
                temp,
                prober: Arc::new(prober),
            }
        }

        fn dest(&self, name: &str) -> PathBuf {
            self.temp.path().join("out").join(name)
        }

        fn work(&self) -> PathBuf {
            self.temp.path().join("work")
        }

        fn compile(&self, pipeline: &Pipeline) -> Program {
            Compiler::new(self.prober.clone(), EncodingConfig::default())
                .compile(pipeline)
                .unwrap()
        }

        fn supervisor(&self, runner: Arc<dyn InvocationRunner>) -> Supervisor {
            let config = SupervisorConfig {
                temp_root: Some(self.work()),
                ..Default::default()
            };
            let analyzers = AnalyzerRegistry::from_config(&Default::default(), runner.clone());
            Supervisor::new(runner, self.prober.clone(), Arc::new(analyzers), config)
        }

        fn workspace_is_clean(&self) -> bool {
            std::fs::read_dir(self.work()).unwrap().next().is_none()
        }
    }

    fn trim(start: f64, end: f64) -> Stage {
        Stage::Trim(TrimParams {
            start: TimeSpec::Seconds(start),
            end: Some(TimeSpec::Seconds(end)),
            duration: None,
        })
    }

    fn trimmed(dest: &Path) -> Pipeline {
        Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(trim(30.0, 90.0), &["src"], Some("cut")))
            .output("cut", dest)
    }

    #[tokio::test]
    async fn copy_eligible_trim_succeeds_on_the_fast_path() {
        let h = Harness::new();
        let dest = h.dest("cut.mp4");
        let program = h.compile(&trimmed(&dest));
        let runner = Arc::new(ScriptedRunner::succeeding());

        let result = h
            .supervisor(runner.clone())
            .execute(&program, "trim", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
        assert_eq!(result.attempted, vec![Strategy::StreamCopy]);
        assert_eq!(result.output_path.as_deref(), Some(dest.as_path()));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "copy");
        assert_eq!(runner.calls().len(), 1);
        assert!(h.workspace_is_clean());
    }

    #[tokio::test]
    async fn rejected_copy_falls_back_once() {
        let h = Harness::new();
        let dest = h.dest("cut.mp4");
        let program = h.compile(&trimmed(&dest));
        let runner = Arc::new(ScriptedRunner::new(|args| {
            if copies(args) {
                fail("[mp4 @ 0x1] Could not find tag for codec pcm_s16le in stream #1")
            } else {
                ok("")
            }
        }));

        let result = h
            .supervisor(runner.clone())
            .execute(&program, "fallback", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::FallbackSuccess);
        assert_eq!(result.attempted, vec![Strategy::StreamCopy, Strategy::Reencode]);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "encode");
        assert_eq!(result.warnings().next().map(|d| d.kind), Some(ErrorKind::EngineRejected));
        assert_eq!(runner.calls().len(), 2);
        assert!(h.workspace_is_clean());
    }

    #[tokio::test]
    async fn ineligible_program_runs_once() {
        let h = Harness::new();
        let dest = h.dest("faded.mp4");
        let pipeline = Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(trim(30.0, 90.0), &["src"], Some("cut")))
            .stage(StageNode::new(
                Stage::Fade(FadeParams {
                    fade_in: 1.0,
                    fade_out: 1.0,
                    video: true,
                    audio: true,
                }),
                &["cut"],
                Some("faded"),
            ))
            .output("faded", &dest);
        let program = h.compile(&pipeline);

        let result = h
            .supervisor(Arc::new(ScriptedRunner::succeeding()))
            .execute(&program, "fade", CancellationToken::new())
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.attempted, vec![Strategy::Reencode]);
    }

    #[tokio::test]
    async fn engine_failure_leaves_no_output() {
        let h = Harness::new();
        let dest = h.dest("cut.mp4");
        let program = h.compile(&trimmed(&dest));
        let runner = Arc::new(ScriptedRunner::new(|_| fail("/media/a.mp4: No space left on device")));

        let result = h
            .supervisor(runner)
            .execute(&program, "broken", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::EngineFailed));
        assert_eq!(result.attempted, vec![Strategy::StreamCopy]);
        assert!(!dest.exists());
        assert!(h.workspace_is_clean());
    }

    #[tokio::test]
    async fn verification_miss_triggers_fallback() {
        let h = Harness::with_prober(
            FakeProber::new()
                .with("/media/a.mp4", fixtures::av(120.0))
                .produced("copy", fixtures::av(58.0))
                .produced("encode", fixtures::av(60.0)),
        );
        let program = h.compile(&trimmed(&h.dest("cut.mp4")));

        let result = h
            .supervisor(Arc::new(ScriptedRunner::succeeding()))
            .execute(&program, "verify", CancellationToken::new())
            .await;
        assert_eq!(result.status, ExecutionStatus::FallbackSuccess);
        assert_eq!(result.attempted, vec![Strategy::StreamCopy, Strategy::Reencode]);
        assert!(result.warnings().any(|d| d.message.contains("expected 60.000s")));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let h = Harness::new();
        let program = h.compile(&trimmed(&h.dest("cut.mp4")));
        let runner = Arc::new(ScriptedRunner::succeeding());
        let token = CancellationToken::new();
        token.cancel();

        let result = h.supervisor(runner.clone()).execute(&program, "cancel", token).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert!(result.attempted.is_empty());
        assert!(runner.calls().is_empty());
        assert!(h.workspace_is_clean());
    }

    struct TimingOut;

    #[async_trait]
    impl InvocationRunner for TimingOut {
        async fn run(
            &self,
            _args: &[String],
            timeout: Duration,
            _cancel: &CancellationToken,
        ) -> cf_core::Result<ToolOutput> {
            Err(cf_core::Error::Timeout {
                tool: "ffmpeg".into(),
                timeout,
            })
        }
    }

    #[tokio::test]
    async fn timeout_is_fatal_without_fallback() {
        let h = Harness::new();
        let program = h.compile(&trimmed(&h.dest("cut.mp4")));

        let result = h
            .supervisor(Arc::new(TimingOut))
            .execute(&program, "slow", CancellationToken::new())
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.attempted, vec![Strategy::StreamCopy]);
        assert_eq!(result.diagnostics[0].step.as_deref(), Some("trim#0"));
        assert!(h.workspace_is_clean());
    }

    #[tokio::test]
    async fn partial_reencode_keeps_earlier_analysis() {
        let h = Harness::new();
        let dest = h.dest("cut.mp4");
        let pipeline = Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(
                Stage::Analyze(AnalyzeParams::new(AnalyzerKind::SceneChanges)),
                &["src"],
                None,
            ))
            .stage(StageNode::new(trim(30.0, 90.0), &["src"], Some("cut")))
            .output("cut", &dest);
        let program = h.compile(&pipeline);
        let runner = Arc::new(ScriptedRunner::new(|args| {
            if args.iter().any(|a| a.starts_with("scdet")) {
                ok("[scdet @ 0x1] lavfi.scdet.score: 40.1, lavfi.scdet.time: 12.5")
            } else if copies(args) {
                fail("Non-monotonous DTS in output stream 0:1")
            } else {
                ok("")
            }
        }));

        let result = h
            .supervisor(runner.clone())
            .execute(&program, "partial", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::FallbackSuccess);
        assert_eq!(
            result.attempted,
            vec![Strategy::StreamCopy, Strategy::PartialReencode]
        );
        assert_eq!(result.analyses.len(), 1);
        // scdet once, the copy attempt, the re-encode.
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn optional_analysis_without_backend_is_a_warning() {
        let h = Harness::new();
        let pipeline = Pipeline::new().input("src", "/media/a.mp4").stage(StageNode::new(
            Stage::Analyze(AnalyzeParams::new(AnalyzerKind::Transcription).optional()),
            &["src"],
            None,
        ));
        let program = h.compile(&pipeline);

        let result = h
            .supervisor(Arc::new(ScriptedRunner::succeeding()))
            .execute(&program, "transcribe", CancellationToken::new())
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.output_path.is_none());
        let warning = result.warnings().next().unwrap();
        assert_eq!(warning.kind, ErrorKind::CapabilityUnavailable);
    }

    #[tokio::test]
    async fn required_analysis_without_backend_fails() {
        let h = Harness::new();
        let pipeline = Pipeline::new().input("src", "/media/a.mp4").stage(StageNode::new(
            Stage::Analyze(AnalyzeParams::new(AnalyzerKind::ObjectDetection)),
            &["src"],
            None,
        ));
        let program = h.compile(&pipeline);

        let result = h
            .supervisor(Arc::new(ScriptedRunner::succeeding()))
            .execute(&program, "detect", CancellationToken::new())
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::CapabilityUnavailable));
    }

    #[tokio::test]
    async fn loudness_measurement_feeds_second_pass() {
        let h = Harness::new();
        let dest = h.dest("loud.mp4");
        let pipeline = Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(trim(30.0, 90.0), &["src"], Some("cut")))
            .stage(StageNode::new(Stage::Loudness(Default::default()), &["cut"], Some("loud")))
            .output("loud", &dest);
        let program = h.compile(&pipeline);
        let runner = Arc::new(ScriptedRunner::new(|args| {
            if args.iter().any(|a| a.contains("print_format=json")) {
                ok(r#"{"input_i": "-30.1", "input_tp": "-6.0", "input_lra": "9.5", "input_thresh": "-40.7", "target_offset": "0.3"}"#)
            } else {
                ok("")
            }
        }));

        let result = h
            .supervisor(runner.clone())
            .execute(&program, "loud", CancellationToken::new())
            .await;
        assert!(result.is_success(), "{:?}", result.diagnostics);

        let calls = runner.calls();
        let last = calls.last().unwrap();
        let graph = last
            .windows(2)
            .find(|w| w[0] == "-filter_complex")
            .map(|w| w[1].clone())
            .unwrap();
        assert!(graph.contains("measured_I=-30.1"), "{graph}");
        assert!(!graph.contains('{'));
    }

    #[tokio::test]
    async fn scene_split_retries_single_segments() {
        let h = Harness::new();
        let dest = h.dest("scenes");
        let pipeline = Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(Stage::SceneSplit(Default::default()), &["src"], Some("scenes")))
            .output("scenes", &dest);
        let program = h.compile(&pipeline);
        let runner = Arc::new(ScriptedRunner::new(|args| {
            if args.iter().any(|a| a.starts_with("scdet")) {
                ok("[scdet @ 0x1] lavfi.scdet.score: 40.1, lavfi.scdet.time: 40.0")
            } else if copies(args) && args.windows(2).any(|w| w == ["-ss", "40"]) {
                fail("[mp4 @ 0x2] Non-monotonous DTS in output stream 0:0")
            } else {
                ok("")
            }
        }));

        let result = h
            .supervisor(runner)
            .execute(&program, "scenes", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::FallbackSuccess);
        assert_eq!(
            result.attempted,
            vec![Strategy::StreamCopy, Strategy::PartialReencode]
        );
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dest.join("scene_001_0.00-40.00.mp4")).unwrap(),
            "copy"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("scene_002_40.00-120.00.mp4")).unwrap(),
            "encode"
        );
        assert!(h.workspace_is_clean());
    }

    #[tokio::test]
    async fn failed_segment_encode_does_not_rerun_program() {
        let h = Harness::new();
        let dest = h.dest("scenes");
        let pipeline = Pipeline::new()
            .input("src", "/media/a.mp4")
            .stage(StageNode::new(Stage::SceneSplit(Default::default()), &["src"], Some("scenes")))
            .output("scenes", &dest);
        let program = h.compile(&pipeline);
        let runner = Arc::new(ScriptedRunner::new(|args| {
            if args.iter().any(|a| a.starts_with("scdet")) {
                ok("[scdet @ 0x1] lavfi.scdet.score: 40.1, lavfi.scdet.time: 40.0")
            } else if args.windows(2).any(|w| w == ["-ss", "40"]) {
                fail("[mp4 @ 0x2] Non-monotonous DTS in output stream 0:0")
            } else {
                ok("")
            }
        }));

        let result = h
            .supervisor(runner.clone())
            .execute(&program, "scenes", CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::EngineFailed));
        assert_eq!(result.attempted, vec![Strategy::StreamCopy, Strategy::PartialReencode]);
        // scdet, scene one copied, scene two copy then encode.
        assert_eq!(runner.calls().len(), 4);
        assert!(!dest.exists());
        assert!(h.workspace_is_clean());
    }
}
