mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use cf_av::ToolRegistry;
use cf_batch::{Job, PipelineRunner, Scheduler};
use cf_core::config::Config;
use cf_pipeline::{Compiler, ExecutionResult, Pipeline};
use cf_probe::Prober;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipforge=debug,cf_pipeline=debug,cf_batch=debug,cf_av=debug,cf_probe=debug,cf_core=debug"
                .to_string()
        } else {
            "clipforge=info,cf_pipeline=info,cf_batch=info,cf_av=warn,cf_probe=warn,cf_core=warn"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run { pipeline, json } => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_pipeline(&pipeline, &config, json))
        }
        Commands::Batch {
            pipelines,
            workers,
            json,
        } => {
            let mut config = Config::load_or_default(config_path);
            if workers.is_some() {
                config.scheduler.workers = workers;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_batch(&pipelines, &config, json))
        }
        Commands::Compile { pipeline } => {
            let config = Config::load_or_default(config_path);
            compile_pipeline(&pipeline, &config)
        }
        Commands::Probe { file, json } => {
            let config = Config::load_or_default(config_path);
            probe_file(&file, &config, json)
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(config_path);
            check_tools(&config)
        }
        Commands::ValidateConfig => validate_config(config_path),
        Commands::Version => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
    Pipeline::load(path).with_context(|| format!("failed to load pipeline {}", path.display()))
}

/// Cancel `token` on Ctrl-C so running invocations are killed and the
/// workspace is cleaned up.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling");
            token.cancel();
        }
    });
}

async fn run_pipeline(path: &Path, config: &Config, json: bool) -> Result<ExitCode> {
    let pipeline = load_pipeline(path)?;
    let engine = clipforge::build_engine(config)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    tracing::info!(pipeline = %path.display(), stages = pipeline.stages.len(), "running pipeline");
    let result = engine.run(&pipeline, cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&path.display().to_string(), &result);
    }

    Ok(exit_code(std::slice::from_ref(&result)))
}

async fn run_batch(paths: &[PathBuf], config: &Config, json: bool) -> Result<ExitCode> {
    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        jobs.push(Job::new(load_pipeline(path)?));
    }

    let engine: Arc<dyn PipelineRunner> = Arc::new(clipforge::build_engine(config)?);
    let scheduler = Arc::new(Scheduler::new(engine, &config.scheduler));
    tracing::info!(jobs = jobs.len(), workers = scheduler.workers(), "starting batch");

    let handles: Vec<_> = jobs.into_iter().map(|job| scheduler.submit(job)).collect();
    let ids: Vec<_> = handles.iter().map(|h| h.id()).collect();

    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; cancelling batch");
                for id in ids {
                    scheduler.cancel(id);
                }
            }
        });
    }

    // Jobs run concurrently inside the scheduler; awaiting in order only
    // fixes the report order.
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.wait().await);
    }

    if json {
        let report: Vec<_> = paths
            .iter()
            .zip(&results)
            .map(|(path, result)| serde_json::json!({ "pipeline": path, "result": result }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (path, result) in paths.iter().zip(&results) {
            print_result(&path.display().to_string(), result);
        }
        let failed = results.iter().filter(|r| !r.is_success()).count();
        println!("\n{} job(s), {} failed", results.len(), failed);
    }

    Ok(exit_code(&results))
}

fn compile_pipeline(path: &Path, config: &Config) -> Result<ExitCode> {
    let pipeline = load_pipeline(path)?;
    let compiler = Compiler::new(clipforge::build_prober(config), config.encoding.clone());
    let program = compiler.compile(&pipeline)?;
    println!("{}", serde_json::to_string_pretty(&program)?);
    Ok(ExitCode::SUCCESS)
}

fn probe_file(file: &Path, config: &Config, json: bool) -> Result<ExitCode> {
    let descriptor = clipforge::build_prober(config).probe(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("File: {}", descriptor.path.display());
    if let Some(ref container) = descriptor.container {
        println!("Container: {}", container);
    }
    println!("Size: {} bytes", descriptor.file_size);
    let secs = descriptor.duration_seconds;
    let whole = secs as u64;
    println!(
        "Duration: {:02}:{:02}:{:06.3}",
        whole / 3600,
        (whole / 60) % 60,
        secs - (whole - whole % 60) as f64
    );

    println!("\nVideo Streams: {}", descriptor.video_streams.len());
    for (i, stream) in descriptor.video_streams.iter().enumerate() {
        print!("  [{}] {} {}x{}", i, stream.codec, stream.width, stream.height);
        if let Some(fps) = stream.frame_rate {
            print!(", {:.3} fps", fps);
        }
        if let Some(bps) = stream.bitrate {
            print!(", {} kb/s", bps / 1000);
        }
        println!();
    }

    println!("\nAudio Streams: {}", descriptor.audio_streams.len());
    for (i, stream) in descriptor.audio_streams.iter().enumerate() {
        print!("  [{}] {} {}ch", i, stream.codec, stream.channels);
        if let Some(rate) = stream.sample_rate {
            print!(", {} Hz", rate);
        }
        if let Some(ref layout) = stream.channel_layout {
            print!(" ({})", layout);
        }
        println!();
    }

    Ok(ExitCode::SUCCESS)
}

fn check_tools(config: &Config) -> Result<ExitCode> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to run pipelines.");
    }

    Ok(ExitCode::SUCCESS)
}

fn validate_config(path: Option<&Path>) -> Result<ExitCode> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            Config::load(p).with_context(|| format!("invalid config {}", p.display()))?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("✓ Configuration parsed with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    println!("  Video codec: {}", config.encoding.video_codec);
    println!("  Audio codec: {}", config.encoding.audio_codec);
    println!("  Invocation timeout: {}s", config.supervisor.invocation_timeout_secs);
    match config.scheduler.workers {
        Some(n) => println!("  Workers: {}", n),
        None => println!("  Workers: auto"),
    }

    Ok(ExitCode::SUCCESS)
}

fn print_result(name: &str, result: &ExecutionResult) {
    println!("{}: {}", name, result.status);
    if let Some(ref output) = result.output_path {
        println!("  Output: {}", output.display());
    }
    if !result.outputs.is_empty() {
        println!("  Outputs: {} file(s)", result.outputs.len());
        for output in &result.outputs {
            println!("    {}", output.display());
        }
    }
    if !result.attempted.is_empty() {
        let attempts: Vec<String> = result.attempted.iter().map(|s| s.to_string()).collect();
        println!("  Attempted: {}", attempts.join(" -> "));
    }
    for report in &result.analyses {
        println!("  Analysis: {} on {}", report.analyzer, report.slot);
    }
    for diag in &result.diagnostics {
        match diag.step {
            Some(ref step) => println!("  {:?} [{}] {}: {}", diag.severity, diag.kind, step, diag.message),
            None => println!("  {:?} [{}]: {}", diag.severity, diag.kind, diag.message),
        }
    }
    println!("  Elapsed: {} ms", result.elapsed_ms);
}

fn exit_code(results: &[ExecutionResult]) -> ExitCode {
    if results.iter().all(ExecutionResult::is_success) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
