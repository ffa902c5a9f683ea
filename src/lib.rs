//! Clipforge - typed media edit pipelines compiled to ffmpeg programs
//!
//! This library crate wires the workspace crates together for the binary and
//! for integration testing.

use std::sync::Arc;

use cf_av::{FfprobeProber, ToolRegistry};
use cf_core::config::Config;
use cf_pipeline::{Engine, FfmpegRunner};
use cf_probe::{CompositeProber, NativeProber, Prober};

/// Prober stack used by the CLI: ffprobe when it is installed, with the
/// native container parser behind it.
pub fn build_prober(config: &Config) -> Arc<dyn Prober> {
    let tools = ToolRegistry::discover(&config.tools);
    let mut probers: Vec<Box<dyn Prober>> = Vec::new();
    match tools.path("ffprobe") {
        Some(path) => probers.push(Box::new(FfprobeProber::new(path.to_path_buf()))),
        None => tracing::warn!("ffprobe not found; falling back to native probing"),
    }
    probers.push(Box::new(NativeProber::new()));
    Arc::new(CompositeProber::new(probers))
}

/// Build an engine backed by the local ffmpeg install.
pub fn build_engine(config: &Config) -> cf_core::Result<Engine> {
    let runner = FfmpegRunner::discover(&config.tools)?;
    tracing::debug!(ffmpeg = %runner.path().display(), "using ffmpeg");
    Ok(Engine::new(build_prober(config), Arc::new(runner), config))
}
