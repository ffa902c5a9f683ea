//! The engine facade: compile, then supervise.

use std::path::Path;
use std::sync::Arc;

use cf_core::config::Config;
use cf_core::RunId;
use cf_probe::{MediaDescriptor, Prober};
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalyzerRegistry;
use crate::compiler::Compiler;
use crate::pipeline::Pipeline;
use crate::program::Program;
use crate::result::ExecutionResult;
use crate::runner::InvocationRunner;
use crate::supervisor::Supervisor;

/// Entry point used by the CLI, the batch scheduler and tool transports.
pub struct Engine {
    prober: Arc<dyn Prober>,
    compiler: Arc<Compiler>,
    supervisor: Supervisor,
}

impl Engine {
    /// Build an engine with the analyzers described by `config`.
    pub fn new(prober: Arc<dyn Prober>, runner: Arc<dyn InvocationRunner>, config: &Config) -> Self {
        let analyzers = AnalyzerRegistry::from_config(&config.analyzers, runner.clone());
        Self::with_analyzers(prober, runner, Arc::new(analyzers), config)
    }

    pub fn with_analyzers(
        prober: Arc<dyn Prober>,
        runner: Arc<dyn InvocationRunner>,
        analyzers: Arc<AnalyzerRegistry>,
        config: &Config,
    ) -> Self {
        let compiler = Compiler::new(prober.clone(), config.encoding.clone());
        let supervisor = Supervisor::new(runner, prober.clone(), analyzers, config.supervisor.clone());
        Self {
            prober,
            compiler: Arc::new(compiler),
            supervisor,
        }
    }

    /// Probe a file off the async runtime.
    pub async fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        let prober = self.prober.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || prober.probe(&path))
            .await
            .map_err(|e| cf_core::Error::Internal(format!("probe task failed: {e}")))?
    }

    /// Compile a pipeline off the async runtime. Probing happens here.
    pub async fn compile(&self, pipeline: &Pipeline) -> cf_core::Result<Program> {
        let compiler = self.compiler.clone();
        let pipeline = pipeline.clone();
        tokio::task::spawn_blocking(move || compiler.compile(&pipeline))
            .await
            .map_err(|e| cf_core::Error::Internal(format!("compile task failed: {e}")))?
    }

    /// Compile and execute a pipeline.
    pub async fn run(&self, pipeline: &Pipeline, cancel: CancellationToken) -> ExecutionResult {
        let label = RunId::new().short();
        self.run_labeled(pipeline, &label, cancel).await
    }

    /// Like [`run`](Self::run), naming the workspace after `label`.
    pub async fn run_labeled(&self, pipeline: &Pipeline, label: &str, cancel: CancellationToken) -> ExecutionResult {
        let started = std::time::Instant::now();
        match self.compile(pipeline).await {
            Ok(program) => {
                tracing::info!(
                    job = label,
                    steps = program.steps.len(),
                    copy_eligible = program.copy_eligible,
                    "executing program"
                );
                self.supervisor.execute(&program, label, cancel).await
            }
            Err(e) => {
                tracing::warn!(job = label, kind = %e.kind(), error = %e, "pipeline rejected");
                let mut result = ExecutionResult::failed(&e, Vec::new());
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                result
            }
        }
    }
}
