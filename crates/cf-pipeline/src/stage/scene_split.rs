//! Split a slot into one file per detected scene.

use std::sync::LazyLock;

use cf_probe::{MediaDescriptor, StreamShape};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{not_lowerable, passthrough, Arity, Capability, Passes, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext};

fn default_threshold() -> f64 {
    10.0
}

fn default_min_scene() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSplitParams {
    /// `scdet` threshold, 0-100. Lower values find more cuts.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Scenes shorter than this many seconds are skipped.
    #[serde(default = "default_min_scene")]
    pub min_scene: f64,
    /// Segment container; defaults to the source's.
    #[serde(default)]
    pub extension: Option<String>,
}

impl Default for SceneSplitParams {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_scene: default_min_scene(),
            extension: None,
        }
    }
}

static SCDET_TIME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"lavfi\.scdet\.time:\s*(\d+(?:\.\d*)?)").ok());

/// Cut times reported by `scdet` on stderr.
pub fn parse_scene_times(stderr: &str) -> Vec<f64> {
    let Some(re) = SCDET_TIME.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(stderr)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// A scene to write, numbered by its position among all boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub number: usize,
    pub start: f64,
    pub end: f64,
}

impl Scene {
    /// `scene_007_12.40-15.02.mp4`.
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "scene_{:03}_{:.2}-{:.2}.{extension}",
            self.number, self.start, self.end
        )
    }
}

/// Turn cut times into scenes covering `[0, duration]`.
///
/// Skipped scenes keep their number, so numbering has gaps rather than
/// shifting when a short scene is dropped.
pub fn scenes(cuts: &[f64], duration: f64, min_scene: f64) -> Vec<Scene> {
    let mut bounds: Vec<f64> = cuts
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t > 0.0 && *t < duration)
        .collect();
    bounds.push(0.0);
    bounds.push(duration);
    bounds.sort_by(f64::total_cmp);
    bounds.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

    bounds
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] - w[0] >= min_scene)
        .map(|(i, w)| Scene {
            number: i + 1,
            start: w[0],
            end: w[1],
        })
        .collect()
}

impl StageOps for SceneSplitParams {
    fn capability(&self) -> Capability {
        Capability::Filter
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn passes(&self) -> Passes {
        Passes::Discrete
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let shape = passthrough(inputs).shape();
        if !shape.video {
            return Err(cf_core::Error::unsupported(format!(
                "scene splitting needs video, input is {shape}"
            )));
        }
        if !(self.threshold > 0.0 && self.threshold <= 100.0) {
            return Err(cf_core::Error::invalid(
                "scene_split",
                format!("threshold {} is outside (0, 100]", self.threshold),
            ));
        }
        if !(self.min_scene >= 0.0) {
            return Err(cf_core::Error::invalid("scene_split", "min_scene must be non-negative"));
        }
        if let Some(ext) = &self.extension {
            if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(cf_core::Error::invalid(
                    "scene_split",
                    format!("extension {ext:?} is not a plain file extension"),
                ));
            }
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        passthrough(inputs)
    }

    fn lower(&self, _cx: &mut LowerContext, _inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        Err(not_lowerable("scene_split"))
    }
}
