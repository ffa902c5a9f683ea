//! Fade in / fade out.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, StreamKind, Streams};

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeParams {
    /// Fade-in length in seconds.
    #[serde(default)]
    pub fade_in: f64,
    /// Fade-out length in seconds.
    #[serde(default)]
    pub fade_out: f64,
    #[serde(default = "yes")]
    pub video: bool,
    #[serde(default = "yes")]
    pub audio: bool,
}

impl StageOps for FadeParams {
    fn capability(&self) -> Capability {
        Capability::Filter
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let invalid = |msg: String| Err(cf_core::Error::invalid("fade", msg));
        if !(self.fade_in >= 0.0 && self.fade_out >= 0.0) {
            return invalid("fade lengths must be non-negative".into());
        }
        if self.fade_in == 0.0 && self.fade_out == 0.0 {
            return invalid("fade needs a fade_in or fade_out length".into());
        }
        if !self.video && !self.audio {
            return invalid("fade applies to neither video nor audio".into());
        }
        let duration = passthrough(inputs).duration_seconds;
        if duration > 0.0 && self.fade_in + self.fade_out > duration {
            return invalid(format!(
                "fades of {}s + {}s do not fit in {duration:.3}s",
                num(self.fade_in),
                num(self.fade_out)
            ));
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let mut out = passthrough(inputs);
        if self.video {
            for v in &mut out.video_streams {
                v.bitrate = None;
            }
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let duration = input.descriptor.duration_seconds;
        let mut fragment = GraphFragment::new();

        let fades = |prefix: &str| -> String {
            let mut parts = Vec::new();
            if self.fade_in > 0.0 {
                parts.push(format!("{prefix}=t=in:st=0:d={}", num(self.fade_in)));
            }
            if self.fade_out > 0.0 {
                parts.push(format!(
                    "{prefix}=t=out:st={}:d={}",
                    num((duration - self.fade_out).max(0.0)),
                    num(self.fade_out)
                ));
            }
            parts.join(",")
        };

        let video = match &input.streams.video {
            Some(pad) if self.video => Some(fragment.filter(cx, pad.clone(), StreamKind::Video, fades("fade"))),
            other => other.clone(),
        };
        let audio = match &input.streams.audio {
            Some(pad) if self.audio => Some(fragment.filter(cx, pad.clone(), StreamKind::Audio, fades("afade"))),
            other => other.clone(),
        };

        fragment.output = Streams { video, audio };
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::InputSpec;
    use crate::stage::fixtures;
    use cf_core::config::EncodingConfig;

    fn fade(fade_in: f64, fade_out: f64) -> FadeParams {
        FadeParams {
            fade_in,
            fade_out,
            video: true,
            audio: true,
        }
    }

    #[test]
    fn fades_must_fit() {
        let src = [fixtures::av(10.0)];
        assert!(fade(2.0, 3.0).validate(&src).is_ok());
        assert!(fade(6.0, 5.0).validate(&src).is_err());
        assert!(fade(0.0, 0.0).validate(&src).is_err());
        assert!(fade(-1.0, 1.0).validate(&src).is_err());
    }

    #[test]
    fn fade_out_starts_before_the_end() {
        let source = fixtures::av(10.0);
        let mut cx = LowerContext::new(EncodingConfig::default());
        let streams = cx.add_input(InputSpec::file("/media/in.mp4"), source.clone());
        let fragment = fade(1.0, 2.5)
            .lower(&mut cx, &[StageInput { streams, descriptor: &source }])
            .unwrap();
        assert_eq!(fragment.chains[0].filters, "fade=t=in:st=0:d=1,fade=t=out:st=7.5:d=2.5");
        assert_eq!(fragment.chains[1].filters, "afade=t=in:st=0:d=1,afade=t=out:st=7.5:d=2.5");
    }
}
