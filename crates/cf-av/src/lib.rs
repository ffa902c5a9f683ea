//! # cf-av
//!
//! External media engine plumbing for the clipforge pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout and
//!   cancellation, killing the child when either fires.
//! - **Workspaces** ([`Workspace`]) -- per-run temporary directories removed
//!   on every exit path, with publish-on-success for outputs.
//! - **Templates** ([`TemplateContext`]) -- `{workspace}` and measurement
//!   placeholders in compiled arguments.
//! - **Diagnostics** ([`diagnostics`]) -- classify engine stderr into
//!   rejected (re-encode may help) or failed.
//! - **Probe backend** ([`probe::FfprobeProber`]) -- implements
//!   [`cf_probe::Prober`] by shelling out to ffprobe.

pub mod command;
pub mod diagnostics;
pub mod probe;
pub mod template;
pub mod tools;
pub mod workspace;

pub use command::{ToolCommand, ToolOutput};
pub use diagnostics::{classify_failure, summary_line};
pub use probe::FfprobeProber;
pub use template::TemplateContext;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::Workspace;
