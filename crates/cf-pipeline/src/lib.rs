//! # cf-pipeline
//!
//! Declarative media pipelines compiled into external engine invocations.
//!
//! This crate provides:
//!
//! - **[`Pipeline`]** -- input bindings, stages wired by named slots, and an
//!   output binding; plain serde data.
//! - **Stage library** ([`stage`]) -- typed parameter records implementing
//!   [`StageOps`]: validation, output estimation and filter-graph lowering.
//! - **[`Compiler`]** -- probes inputs, checks the slot graph and merges
//!   stages into as few invocations as possible.
//! - **[`Supervisor`]** -- runs a [`Program`] with a stream-copy fast path
//!   and one re-encoding fallback inside a scoped workspace.
//! - **Analyzers** ([`analysis`]) -- scene changes and silence through the
//!   engine, transcription and object detection through external commands.
//! - **[`Engine`]** -- compile plus supervise behind one call.

pub mod analysis;
pub mod codecs;
pub mod compiler;
pub mod engine;
pub mod graph;
pub mod pipeline;
pub mod program;
pub mod result;
pub mod runner;
pub mod stage;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use analysis::{AnalysisData, AnalysisReport, Analyzer, AnalyzerKind, AnalyzerRegistry};
pub use compiler::Compiler;
pub use engine::Engine;
pub use pipeline::{InputBinding, OutputBinding, Pipeline, StageNode};
pub use program::{Program, RenderMode, Step};
pub use result::{Diagnostic, ExecutionResult, ExecutionStatus, Severity, Strategy};
pub use runner::{FfmpegRunner, InvocationRunner};
pub use stage::{Stage, StageOps};
pub use supervisor::Supervisor;
