//! Playback speed change.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, StreamKind, Streams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedParams {
    /// `2.0` plays twice as fast.
    pub factor: f64,
}

/// Split a tempo factor into `atempo` steps, each within [0.5, 2].
pub fn atempo_chain(factor: f64) -> Vec<f64> {
    let mut steps = Vec::new();
    let mut rest = factor;
    while rest > 2.0 {
        steps.push(2.0);
        rest /= 2.0;
    }
    while rest < 0.5 {
        steps.push(0.5);
        rest /= 0.5;
    }
    steps.push(rest);
    steps
}

impl StageOps for SpeedParams {
    fn capability(&self) -> Capability {
        Capability::Filter
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn validate(&self, _inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        if !(self.factor > 0.25 && self.factor <= 4.0) {
            return Err(cf_core::Error::invalid(
                "speed",
                format!("factor {} is outside (0.25, 4]", self.factor),
            ));
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let source = passthrough(inputs);
        let duration = source.duration_seconds / self.factor;
        let mut out = source.with_duration(duration);
        for v in &mut out.video_streams {
            v.bitrate = None;
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let mut fragment = GraphFragment::new();

        let video = input.streams.video.clone().map(|pad| {
            fragment.filter(cx, pad, StreamKind::Video, format!("setpts=PTS/{}", num(self.factor)))
        });
        let audio = input.streams.audio.clone().map(|pad| {
            let tempo: Vec<String> = atempo_chain(self.factor)
                .into_iter()
                .map(|f| format!("atempo={}", num(f)))
                .collect();
            fragment.filter(cx, pad, StreamKind::Audio, tempo.join(","))
        });

        fragment.output = Streams { video, audio };
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::fixtures;

    #[test]
    fn tempo_chain_stays_in_range() {
        assert_eq!(atempo_chain(1.5), vec![1.5]);
        assert_eq!(atempo_chain(4.0), vec![2.0, 2.0]);
        assert_eq!(atempo_chain(3.0), vec![2.0, 1.5]);
        assert_eq!(atempo_chain(0.3), vec![0.5, 0.6]);
        for f in [0.26, 0.7, 2.5, 3.9] {
            let chain = atempo_chain(f);
            assert!(chain.iter().all(|s| (0.5..=2.0).contains(s)), "{f}: {chain:?}");
            let product: f64 = chain.iter().product();
            assert!((product - f).abs() < 1e-9);
        }
    }

    #[test]
    fn factor_bounds() {
        let src = [fixtures::av(10.0)];
        assert!(SpeedParams { factor: 0.25 }.validate(&src).is_err());
        assert!(SpeedParams { factor: 4.0 }.validate(&src).is_ok());
        assert!(SpeedParams { factor: 4.5 }.validate(&src).is_err());
        assert!(SpeedParams { factor: f64::NAN }.validate(&src).is_err());
    }

    #[test]
    fn duration_scales_inversely() {
        let out = SpeedParams { factor: 2.0 }.describe_output(&[fixtures::av(10.0)]);
        assert_eq!(out.duration_seconds, 5.0);
    }
}
