//! The stage library.
//!
//! [`Stage`] is a closed set of typed parameter records, one variant per
//! transformation. Every variant implements [`StageOps`]: it declares its
//! capability tag and arity, validates its parameters against the estimated
//! descriptors of its inputs, predicts its output descriptor, and lowers into
//! a [`GraphFragment`].

mod analyze;
mod concat;
mod fade;
mod filter;
mod loudness;
mod mix;
mod overlay;
mod scene_split;
mod speed;
mod time;
mod transcode;
mod trim;

use std::fmt;

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use crate::graph::{GraphFragment, LowerContext, Streams};

pub use analyze::AnalyzeParams;
pub use concat::{ConcatParams, Transition, TransitionKind};
pub use fade::FadeParams;
pub use filter::{AudioFilter, FilterParams, VideoFilter};
pub use loudness::{measurement_var, parse_measurement, LoudnessParams};
pub use mix::{Ducking, MixDuration, MixInput, MixParams};
pub use overlay::{Anchor, NamedPosition, OverlayElement, OverlayKind, OverlayParams};
pub use scene_split::{parse_scene_times, scenes, Scene, SceneSplitParams};
pub use speed::SpeedParams;
pub use time::{parse_timestamp, TimeSpec};
pub use transcode::{AudioTarget, TranscodeParams, VideoTarget};
pub use trim::TrimParams;

/// Coarse category of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Filter,
    Trim,
    Overlay,
    Concat,
    Mix,
    Transcode,
    Analyze,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Filter => "filter",
            Capability::Trim => "trim",
            Capability::Overlay => "overlay",
            Capability::Concat => "concat",
            Capability::Mix => "mix",
            Capability::Transcode => "transcode",
            Capability::Analyze => "analyze",
        };
        f.write_str(s)
    }
}

/// How many inputs a stage takes and which stream kinds they must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    /// `None` means unbounded.
    pub max: Option<usize>,
    /// Required stream kinds of the first input.
    pub first: StreamShape,
    /// Required stream kinds of every further input.
    pub rest: StreamShape,
}

impl Arity {
    /// Exactly one input carrying `shape`.
    pub const fn single(shape: StreamShape) -> Self {
        Self {
            min: 1,
            max: Some(1),
            first: shape,
            rest: shape,
        }
    }

    pub const fn at_least(min: usize, shape: StreamShape) -> Self {
        Self {
            min,
            max: None,
            first: shape,
            rest: shape,
        }
    }

    /// Check input count and shapes.
    pub fn check(&self, stage: &str, shapes: &[StreamShape]) -> cf_core::Result<()> {
        let n = shapes.len();
        if n < self.min || self.max.is_some_and(|max| n > max) {
            let expected = match self.max {
                Some(max) if max == self.min => format!("{max}"),
                Some(max) => format!("{}..={max}", self.min),
                None => format!("at least {}", self.min),
            };
            return Err(cf_core::Error::incompatible(format!(
                "{stage} takes {expected} input(s), got {n}"
            )));
        }
        for (i, shape) in shapes.iter().enumerate() {
            let required = if i == 0 { self.first } else { self.rest };
            if !shape.covers(required) {
                return Err(cf_core::Error::incompatible(format!(
                    "{stage} input {i} needs {}, found {shape}",
                    needs(required)
                )));
            }
            if shape.is_empty() {
                return Err(cf_core::Error::incompatible(format!(
                    "{stage} input {i} carries no streams"
                )));
            }
        }
        Ok(())
    }
}

fn needs(shape: StreamShape) -> &'static str {
    match (shape.video, shape.audio) {
        (true, true) => "audio and video",
        (true, false) => "a video stream",
        (false, true) => "an audio stream",
        (false, false) => "nothing",
    }
}

/// How a stage executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passes {
    /// Lowers into the invocation of its output.
    Single,
    /// Needs a measurement pass over a materialized input first.
    TwoPass,
    /// Produces a set of files rather than a stream.
    Discrete,
    /// Produces metadata only; consumes a file without altering it.
    Tap,
}

/// An input of a stage while lowering: its current streams plus the
/// estimated descriptor of the slot.
#[derive(Debug, Clone)]
pub struct StageInput<'a> {
    pub streams: Streams,
    pub descriptor: &'a MediaDescriptor,
}

/// The contract every stage implements.
pub trait StageOps {
    fn capability(&self) -> Capability;

    fn arity(&self) -> Arity;

    fn passes(&self) -> Passes {
        Passes::Single
    }

    /// Check parameters against the (estimated) input descriptors.
    ///
    /// Runs before any process is spawned.
    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()>;

    /// Estimated descriptor of the stage's output slot.
    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor;

    /// Contribute filter chains and return the output streams.
    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment>;
}

/// A typed stage, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    Trim(TrimParams),
    Filter(FilterParams),
    Speed(SpeedParams),
    Fade(FadeParams),
    Overlay(OverlayParams),
    Concat(ConcatParams),
    Mix(MixParams),
    Transcode(TranscodeParams),
    Loudness(LoudnessParams),
    SceneSplit(SceneSplitParams),
    Analyze(AnalyzeParams),
}

impl Stage {
    /// The JSON tag of this stage.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Trim(_) => "trim",
            Stage::Filter(_) => "filter",
            Stage::Speed(_) => "speed",
            Stage::Fade(_) => "fade",
            Stage::Overlay(_) => "overlay",
            Stage::Concat(_) => "concat",
            Stage::Mix(_) => "mix",
            Stage::Transcode(_) => "transcode",
            Stage::Loudness(_) => "loudness",
            Stage::SceneSplit(_) => "scene_split",
            Stage::Analyze(_) => "analyze",
        }
    }

    pub fn ops(&self) -> &dyn StageOps {
        match self {
            Stage::Trim(p) => p,
            Stage::Filter(p) => p,
            Stage::Speed(p) => p,
            Stage::Fade(p) => p,
            Stage::Overlay(p) => p,
            Stage::Concat(p) => p,
            Stage::Mix(p) => p,
            Stage::Transcode(p) => p,
            Stage::Loudness(p) => p,
            Stage::SceneSplit(p) => p,
            Stage::Analyze(p) => p,
        }
    }
}

/// Output descriptor for stages that do not change stream parameters.
pub(crate) fn passthrough(inputs: &[MediaDescriptor]) -> MediaDescriptor {
    inputs
        .first()
        .cloned()
        .unwrap_or_else(|| MediaDescriptor::new("", 0.0))
}

/// `x` formatted for a filter argument: integers without a fraction,
/// everything else with up to six decimals.
pub(crate) fn num(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        let s = format!("{x:.6}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Error for a stage that is executed as its own step.
pub(crate) fn not_lowerable(kind: &str) -> cf_core::Error {
    cf_core::Error::Internal(format!("{kind} runs as its own step and has no filter graph"))
}
