//! Cut a time range out of a slot.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps, TimeSpec};
use crate::graph::{GraphFragment, LowerContext, Streams, StreamKind};

fn zero() -> TimeSpec {
    TimeSpec::Seconds(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimParams {
    #[serde(default = "zero")]
    pub start: TimeSpec,
    /// Absolute end position. Clamped to the source duration.
    #[serde(default)]
    pub end: Option<TimeSpec>,
    /// Length of the kept range, as an alternative to `end`.
    #[serde(default)]
    pub duration: Option<TimeSpec>,
}

impl TrimParams {
    /// Resolve `[start, end)` in seconds against the source.
    pub fn range(&self, source: &MediaDescriptor) -> cf_core::Result<(f64, f64)> {
        let invalid = |msg: String| cf_core::Error::invalid("trim", msg);
        let fps = source.primary_video().and_then(|v| v.frame_rate);

        let start = self.start.resolve(fps).map_err(invalid)?;
        let end = match (&self.end, &self.duration) {
            (Some(_), Some(_)) => return Err(invalid("give either end or duration, not both".into())),
            (Some(end), None) => end.resolve(fps).map_err(invalid)?,
            (None, Some(len)) => start + len.resolve(fps).map_err(invalid)?,
            (None, None) => source.duration_seconds,
        };

        let total = source.duration_seconds;
        let end = if total > 0.0 {
            if start >= total {
                return Err(invalid(format!(
                    "start {start:.3}s is beyond the source duration {total:.3}s"
                )));
            }
            if end > total {
                tracing::debug!(requested = end, clamped = total, "trim end clamped to source duration");
            }
            end.min(total)
        } else {
            end
        };

        if end <= start {
            return Err(invalid(format!(
                "end ({end:.3}s) must exceed start ({start:.3}s)"
            )));
        }
        Ok((start, end))
    }
}

impl StageOps for TrimParams {
    fn capability(&self) -> Capability {
        Capability::Trim
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        self.range(&passthrough(inputs)).map(|_| ())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let source = passthrough(inputs);
        match self.range(&source) {
            Ok((start, end)) => source.with_duration(end - start),
            Err(_) => source,
        }
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let (start, end) = self.range(input.descriptor)?;
        let mut fragment = GraphFragment::new();

        // An untouched input is cut by seeking, which keeps it copyable.
        if cx.seek_input(&input.streams, start, Some(end)) {
            fragment.output = input.streams.clone();
            return Ok(fragment);
        }

        let (s, e) = (num(start), num(end));
        let video = input.streams.video.clone().map(|pad| {
            fragment.filter(
                cx,
                pad,
                StreamKind::Video,
                format!("trim=start={s}:end={e},setpts=PTS-STARTPTS"),
            )
        });
        let audio = input.streams.audio.clone().map(|pad| {
            fragment.filter(
                cx,
                pad,
                StreamKind::Audio,
                format!("atrim=start={s}:end={e},asetpts=PTS-STARTPTS"),
            )
        });
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

    fn trim(start: f64, end: f64) -> TrimParams {
        TrimParams {
            start: TimeSpec::Seconds(start),
            end: Some(TimeSpec::Seconds(end)),
            duration: None,
        }
    }

    #[test]
    fn range_is_clamped_to_source() {
        let source = fixtures::av(120.0);
        assert_eq!(trim(30.0, 90.0).range(&source).unwrap(), (30.0, 90.0));
        assert_eq!(trim(30.0, 500.0).range(&source).unwrap(), (30.0, 120.0));
        assert_eq!(trim(30.0, 90.0).describe_output(&[source]).duration_seconds, 60.0);
    }

    #[test]
    fn end_must_exceed_start() {
        let source = fixtures::av(120.0);
        let err = trim(50.0, 40.0).validate(&[source.clone()]).unwrap_err();
        assert_eq!(err.kind(), cf_core::ErrorKind::InvalidParameter);
        assert!(trim(130.0, 140.0).validate(&[source]).is_err());
    }

    #[test]
    fn frames_and_duration_forms() {
        let source = fixtures::av(120.0);
        let params = TrimParams {
            start: TimeSpec::Frames { frames: 300 },
            end: None,
            duration: Some(TimeSpec::Timestamp("00:20".into())),
        };
        assert_eq!(params.range(&source).unwrap(), (10.0, 30.0));

        let both = TrimParams {
            end: Some(TimeSpec::Seconds(40.0)),
            ..params
        };
        assert!(both.range(&source).is_err());
    }

    #[test]
    fn untouched_input_lowers_to_seek() {
        let source = fixtures::av(120.0);
        let mut cx = LowerContext::new(EncodingConfig::default());
        let streams = cx.add_input(InputSpec::file("/media/in.mp4"), source.clone());
        let fragment = trim(30.0, 90.0)
            .lower(&mut cx, &[StageInput { streams: streams.clone(), descriptor: &source }])
            .unwrap();
        assert!(fragment.chains.is_empty());
        assert_eq!(fragment.output, streams);
    }

    #[test]
    fn filtered_input_uses_trim_filters() {
        let source = fixtures::av(120.0);
        let mut cx = LowerContext::new(EncodingConfig::default());
        let streams = cx.add_input(InputSpec::file("/media/in.mp4"), source.clone());
        // Simulate an upstream filter on video.
        let mut upstream = GraphFragment::new();
        let v = upstream.filter(&mut cx, streams.video.clone().unwrap(), StreamKind::Video, "hflip");
        let input = StageInput {
            streams: Streams { video: Some(v), audio: streams.audio.clone() },
            descriptor: &source,
        };
        let fragment = trim(1.5, 4.0).lower(&mut cx, &[input]).unwrap();
        assert_eq!(fragment.chains.len(), 2);
        assert_eq!(fragment.chains[0].filters, "trim=start=1.5:end=4,setpts=PTS-STARTPTS");
        assert_eq!(fragment.chains[1].filters, "atrim=start=1.5:end=4,asetpts=PTS-STARTPTS");
        assert!(!fragment.output.video.unwrap().is_source());
    }
}
