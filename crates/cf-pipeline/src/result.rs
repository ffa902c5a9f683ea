//! What a program execution reports back.

use std::fmt;
use std::path::PathBuf;

use cf_core::ErrorKind;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Success,
    /// The fast path was rejected and a re-encode succeeded.
    FallbackSuccess,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::FallbackSuccess => "fallback-success",
            ExecutionStatus::Failed => "failed",
        })
    }
}

/// An attempt strategy, in the order attempts were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Every copy-eligible stream is copied.
    StreamCopy,
    /// Resume at the failing step with every stream encoded.
    PartialReencode,
    /// Rerun the whole program with every stream encoded.
    Reencode,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::StreamCopy => "stream-copy",
            Strategy::PartialReencode => "partial-reencode",
            Strategy::Reencode => "reencode",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    /// Verbatim engine output, when there is any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Label of the step the diagnostic belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl Diagnostic {
    pub fn from_error(err: &cf_core::Error, severity: Severity) -> Self {
        Self {
            kind: err.kind(),
            severity,
            message: err.to_string(),
            detail: err.stderr().filter(|s| !s.is_empty()).map(str::to_string),
            step: None,
        }
    }

    pub fn at_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// The published output file or directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Every published file (one per scene for a scene split).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PathBuf>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Strategies tried, in order.
    #[serde(default)]
    pub attempted: Vec<Strategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyses: Vec<AnalysisReport>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// A failed result carrying `err` as its error diagnostic.
    pub fn failed(err: &cf_core::Error, attempted: Vec<Strategy>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output_path: None,
            outputs: Vec::new(),
            diagnostics: vec![Diagnostic::from_error(err, Severity::Error)],
            attempted,
            analyses: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ExecutionStatus::Failed
    }

    /// Kind of the first error diagnostic.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
            .map(|d| d.kind)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning)
    }
}
