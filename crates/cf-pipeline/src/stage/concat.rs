//! Join clips end to end, optionally with transitions.
//!
//! Transitions overlap adjacent clips: clip *k* starts `d` seconds before
//! the running output ends, so N clips with a transition of `d` seconds last
//! `sum(durations) - (N - 1) * d`.

use cf_probe::{AudioStream, MediaDescriptor, StreamShape, VideoStream};
use serde::{Deserialize, Serialize};

use super::{num, Arity, Capability, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, Pad, StreamKind, Streams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Fade,
    Dissolve,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    CircleOpen,
    CircleClose,
}

impl TransitionKind {
    /// The `xfade` transition name.
    pub fn xfade_name(self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::Dissolve => "dissolve",
            TransitionKind::WipeLeft => "wipeleft",
            TransitionKind::WipeRight => "wiperight",
            TransitionKind::WipeUp => "wipeup",
            TransitionKind::WipeDown => "wipedown",
            TransitionKind::SlideLeft => "slideleft",
            TransitionKind::SlideRight => "slideright",
            TransitionKind::SlideUp => "slideup",
            TransitionKind::SlideDown => "slidedown",
            TransitionKind::CircleOpen => "circleopen",
            TransitionKind::CircleClose => "circleclose",
        }
    }

    /// Whether the transition only makes sense on pictures.
    fn is_visual(self) -> bool {
        !matches!(self, TransitionKind::Fade | TransitionKind::Dissolve)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    /// Overlap in seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcatParams {
    #[serde(default)]
    pub transition: Option<Transition>,
}

/// Output geometry every clip is normalized to.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Geometry {
    width: u32,
    height: u32,
    fps: f64,
}

const NORMALIZED_RATE: u32 = 48_000;

impl ConcatParams {
    fn geometry(&self, cx_default: (u32, u32, f64), inputs: &[MediaDescriptor]) -> Geometry {
        let first = inputs.iter().find_map(|d| d.primary_video());
        match first {
            Some(v) if v.width > 0 && v.height > 0 => Geometry {
                width: v.width,
                height: v.height,
                fps: v.frame_rate.unwrap_or(cx_default.2),
            },
            _ => Geometry {
                width: cx_default.0,
                height: cx_default.1,
                fps: cx_default.2,
            },
        }
    }

    fn overlap(&self) -> f64 {
        self.transition.as_ref().map_or(0.0, |t| t.duration)
    }

    /// Whether every clip shares codec and stream parameters, so the concat
    /// demuxer can join them without decoding.
    fn uniform(inputs: &[MediaDescriptor]) -> bool {
        let Some(first) = inputs.first() else {
            return false;
        };
        let same_video = |a: Option<&VideoStream>, b: Option<&VideoStream>| match (a, b) {
            (Some(a), Some(b)) => {
                a.codec == b.codec
                    && a.width == b.width
                    && a.height == b.height
                    && match (a.frame_rate, b.frame_rate) {
                        (Some(x), Some(y)) => (x - y).abs() < 0.01,
                        _ => false,
                    }
            }
            (None, None) => true,
            _ => false,
        };
        let same_audio = |a: Option<&AudioStream>, b: Option<&AudioStream>| match (a, b) {
            (Some(a), Some(b)) => {
                a.codec == b.codec && a.sample_rate == b.sample_rate && a.channels == b.channels
            }
            (None, None) => true,
            _ => false,
        };
        inputs.iter().skip(1).all(|d| {
            same_video(first.primary_video(), d.primary_video())
                && same_audio(first.primary_audio(), d.primary_audio())
        })
    }
}

impl StageOps for ConcatParams {
    fn capability(&self) -> Capability {
        Capability::Concat
    }

    fn arity(&self) -> Arity {
        Arity::at_least(2, StreamShape::NONE)
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let shape = first.shape();
        if let Some(odd) = inputs.iter().position(|d| d.shape() != shape) {
            return Err(cf_core::Error::unsupported(format!(
                "concat input {odd} is {} but input 0 is {shape}",
                inputs[odd].shape()
            )));
        }

        if let Some(t) = &self.transition {
            if !shape.video && t.kind.is_visual() {
                return Err(cf_core::Error::unsupported(format!(
                    "transition {} needs video, clips are {shape}",
                    t.kind.xfade_name()
                )));
            }
            if !(t.duration > 0.0) {
                return Err(cf_core::Error::invalid("concat", "transition duration must be positive"));
            }
            let shortest = inputs
                .iter()
                .map(|d| d.duration_seconds)
                .fold(f64::INFINITY, f64::min);
            if t.duration >= shortest {
                return Err(cf_core::Error::invalid(
                    "concat",
                    format!(
                        "transition of {}s must be shorter than every clip (shortest is {shortest:.3}s)",
                        num(t.duration)
                    ),
                ));
            }
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let total: f64 = inputs.iter().map(|d| d.duration_seconds).sum();
        let overlaps = inputs.len().saturating_sub(1) as f64 * self.overlap();
        let Some(first) = inputs.first() else {
            return MediaDescriptor::new("", 0.0);
        };
        let mut out = first.clone().with_duration(total - overlaps);

        if self.transition.is_some() || !Self::uniform(inputs) {
            let default = (1280, 720, 30.0);
            let g = self.geometry(default, inputs);
            for v in &mut out.video_streams {
                v.width = g.width;
                v.height = g.height;
                v.frame_rate = Some(g.fps);
                v.bitrate = None;
            }
            for a in &mut out.audio_streams {
                a.sample_rate = Some(NORMALIZED_RATE);
                a.channels = 2;
                a.channel_layout = Some("stereo".into());
                a.bitrate = None;
            }
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let mut fragment = GraphFragment::new();
        let descriptors: Vec<MediaDescriptor> = inputs.iter().map(|i| i.descriptor.clone()).collect();

        // Demuxer path: whole untouched files with identical parameters.
        if self.transition.is_none() && Self::uniform(&descriptors) {
            let sources: Option<Vec<usize>> = inputs.iter().map(|i| i.streams.single_source()).collect();
            if let Some(sources) = sources {
                let all_whole = sources
                    .iter()
                    .zip(&descriptors)
                    .all(|(&s, d)| cx.input_descriptor(s).is_some_and(|src| src.duration_seconds == d.duration_seconds));
                if all_whole {
                    let joined = self.describe_output(&descriptors);
                    if let Some(streams) = cx.concat_inputs(&sources, joined) {
                        fragment.output = streams;
                        return Ok(fragment);
                    }
                }
            }
        }

        let enc = &cx.encoding;
        let g = self.geometry(
            (enc.default_width, enc.default_height, enc.default_frame_rate),
            &descriptors,
        );
        let pix_fmt = enc.pixel_format.clone();
        let video_norm = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format={pix_fmt}",
            w = g.width,
            h = g.height,
            fps = num(g.fps),
        );
        let audio_norm = format!(
            "aresample={NORMALIZED_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo"
        );

        let mut videos: Vec<Pad> = Vec::new();
        let mut audios: Vec<Pad> = Vec::new();
        for input in inputs {
            if let Some(pad) = input.streams.video.clone() {
                videos.push(fragment.filter(cx, pad, StreamKind::Video, video_norm.clone()));
            }
            if let Some(pad) = input.streams.audio.clone() {
                audios.push(fragment.filter(cx, pad, StreamKind::Audio, audio_norm.clone()));
            }
        }

        let output = match &self.transition {
            None => {
                let n = inputs.len();
                let has_v = !videos.is_empty();
                let has_a = !audios.is_empty();
                let mut pads = Vec::new();
                for i in 0..n {
                    if has_v {
                        pads.push(videos[i].clone());
                    }
                    if has_a {
                        pads.push(audios[i].clone());
                    }
                }
                let mut outs = Vec::new();
                let v_out = has_v.then(|| cx.label(StreamKind::Video));
                let a_out = has_a.then(|| cx.label(StreamKind::Audio));
                outs.extend(v_out.clone());
                outs.extend(a_out.clone());
                fragment.chain(
                    pads,
                    format!("concat=n={n}:v={}:a={}", has_v as u8, has_a as u8),
                    outs,
                );
                Streams {
                    video: v_out.map(Pad::Label),
                    audio: a_out.map(Pad::Label),
                }
            }
            Some(t) => {
                let d = t.duration;
                let mut video = None;
                if let Some((first, rest)) = videos.split_first() {
                    let mut acc = first.clone();
                    let mut length = descriptors[0].duration_seconds;
                    for (k, pad) in rest.iter().enumerate() {
                        let offset = length - d;
                        let out = cx.label(StreamKind::Video);
                        fragment.chain(
                            vec![acc, pad.clone()],
                            format!(
                                "xfade=transition={}:duration={}:offset={}",
                                t.kind.xfade_name(),
                                num(d),
                                num(offset)
                            ),
                            vec![out.clone()],
                        );
                        acc = Pad::Label(out);
                        length += descriptors[k + 1].duration_seconds - d;
                    }
                    video = Some(acc);
                }

                let mut audio = None;
                if let Some((first, rest)) = audios.split_first() {
                    let mut acc = first.clone();
                    for pad in rest {
                        let out = cx.label(StreamKind::Audio);
                        fragment.chain(
                            vec![acc, pad.clone()],
                            format!("acrossfade=d={}:c1=tri:c2=tri", num(d)),
                            vec![out.clone()],
                        );
                        acc = Pad::Label(out);
                    }
                    audio = Some(acc);
                }
                Streams { video, audio }
            }
        };

        fragment.output = output;
        Ok(fragment)
    }
}
