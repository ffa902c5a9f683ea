//! Two-pass EBU R128 loudness normalization.
//!
//! The first pass runs `loudnorm` in analysis mode over a materialized copy
//! of the input and prints its measurements as JSON on stderr. The second
//! pass feeds them back through the `{loudnorm_N}` template variable so the
//! filter can normalize linearly.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, Passes, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, StreamKind, Streams};

fn default_integrated() -> f64 {
    -23.0
}
fn default_range() -> f64 {
    7.0
}
fn default_true_peak() -> f64 {
    -2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessParams {
    /// Integrated loudness target in LUFS.
    #[serde(default = "default_integrated")]
    pub integrated: f64,
    /// Loudness range target in LU.
    #[serde(default = "default_range")]
    pub range: f64,
    /// Maximum true peak in dBTP.
    #[serde(default = "default_true_peak")]
    pub true_peak: f64,
}

impl Default for LoudnessParams {
    fn default() -> Self {
        Self {
            integrated: default_integrated(),
            range: default_range(),
            true_peak: default_true_peak(),
        }
    }
}

/// Template variable holding the measurements for stage `node`.
pub fn measurement_var(node: usize) -> String {
    format!("loudnorm_{node}")
}

impl LoudnessParams {
    fn targets(&self) -> String {
        format!(
            "loudnorm=I={}:LRA={}:TP={}",
            num(self.integrated),
            num(self.range),
            num(self.true_peak)
        )
    }

    /// Filter of the measurement pass.
    pub fn measure_filter(&self) -> String {
        format!("{}:print_format=json", self.targets())
    }

    /// Filter of the normalization pass, reading `{var}`.
    pub fn apply_filter(&self, var: &str, sample_rate: u32) -> String {
        format!("{}:{{{var}}}:linear=true,aresample={sample_rate}", self.targets())
    }
}

/// Extract the measurement JSON printed by `loudnorm` and format it as
/// filter options (`measured_I=...:offset=...`).
pub fn parse_measurement(stderr: &str) -> cf_core::Result<String> {
    let missing = || cf_core::Error::EngineFailed {
        tool: "ffmpeg".into(),
        message: "loudness measurement printed no results".into(),
        stderr: stderr.to_string(),
    };
    let start = stderr.rfind('{').ok_or_else(missing)?;
    let end = stderr[start..].find('}').ok_or_else(missing)? + start;
    let json: serde_json::Value = serde_json::from_str(&stderr[start..=end]).map_err(|_| missing())?;

    let field = |name: &str| -> cf_core::Result<String> {
        let value = json.get(name).ok_or_else(missing)?;
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        // Silence measures as -inf, which loudnorm does not accept back.
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(text),
            _ => Ok("-70".to_string()),
        }
    };

    Ok(format!(
        "measured_I={}:measured_LRA={}:measured_TP={}:measured_thresh={}:offset={}",
        field("input_i")?,
        field("input_lra")?,
        field("input_tp")?,
        field("input_thresh")?,
        field("target_offset")?
    ))
}

impl StageOps for LoudnessParams {
    fn capability(&self) -> Capability {
        Capability::Filter
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::AUDIO)
    }

    fn passes(&self) -> Passes {
        Passes::TwoPass
    }

    fn validate(&self, _inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let check = |name: &str, value: f64, lo: f64, hi: f64| {
            if (lo..=hi).contains(&value) {
                Ok(())
            } else {
                Err(cf_core::Error::invalid(
                    "loudness",
                    format!("{name} {value} is outside [{}, {}]", num(lo), num(hi)),
                ))
            }
        };
        check("integrated", self.integrated, -70.0, -5.0)?;
        check("range", self.range, 1.0, 20.0)?;
        check("true_peak", self.true_peak, -9.0, 0.0)
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let mut out = passthrough(inputs);
        for a in &mut out.audio_streams {
            a.bitrate = None;
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let mut fragment = GraphFragment::new();
        let sample_rate = input
            .descriptor
            .primary_audio()
            .and_then(|a| a.sample_rate)
            .unwrap_or(48_000);
        let var = measurement_var(cx.node());

        let audio = input
            .streams
            .audio
            .clone()
            .map(|pad| fragment.filter(cx, pad, StreamKind::Audio, self.apply_filter(&var, sample_rate)));
        fragment.output = Streams {
            video: input.streams.video.clone(),
            audio,
        };
        Ok(fragment)
    }
}
