//! Metadata-only analysis of a slot.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{not_lowerable, passthrough, Arity, Capability, Passes, StageInput, StageOps};
use crate::analysis::AnalyzerKind;
use crate::graph::{GraphFragment, LowerContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeParams {
    pub analyzer: AnalyzerKind,
    /// A failing optional analyzer becomes a warning instead of failing the
    /// job.
    #[serde(default)]
    pub optional: bool,
    /// Scene score threshold (0-100) or silence level in dB.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Minimum silence length in seconds.
    #[serde(default)]
    pub min_duration: Option<f64>,
    /// Transcription language hint.
    #[serde(default)]
    pub language: Option<String>,
}

impl AnalyzeParams {
    pub fn new(analyzer: AnalyzerKind) -> Self {
        Self {
            analyzer,
            optional: false,
            threshold: None,
            min_duration: None,
            language: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl StageOps for AnalyzeParams {
    fn capability(&self) -> Capability {
        Capability::Analyze
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn passes(&self) -> Passes {
        Passes::Tap
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let shape = passthrough(inputs).shape();
        let required = self.analyzer.requires();
        if !shape.covers(required) {
            return Err(cf_core::Error::unsupported(format!(
                "{} analysis needs {}, slot is {shape}",
                self.analyzer,
                if required.video { "video" } else { "audio" }
            )));
        }

        let invalid = |msg: String| Err(cf_core::Error::invalid("analyze", msg));
        match (self.analyzer, self.threshold) {
            (AnalyzerKind::SceneChanges, Some(t)) if !(t > 0.0 && t <= 100.0) => {
                return invalid(format!("scene threshold {t} is outside (0, 100]"));
            }
            (AnalyzerKind::Silence, Some(t)) if !(-90.0..=0.0).contains(&t) => {
                return invalid(format!("silence level {t} dB is outside [-90, 0]"));
            }
            _ => {}
        }
        if let Some(d) = self.min_duration {
            if !(d > 0.0) {
                return invalid("min_duration must be positive".into());
            }
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        passthrough(inputs)
    }

    fn lower(&self, _cx: &mut LowerContext, _inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        Err(not_lowerable("analyze"))
    }
}
