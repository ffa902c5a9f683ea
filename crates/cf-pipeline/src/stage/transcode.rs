//! Codec, bitrate and geometry targets.
//!
//! Encoder settings are recorded on the [`LowerContext`] and applied when
//! the output streams are rendered. Geometry, frame rate and audio format
//! changes become filters, so a stream that needs them is never copied.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps};
use crate::codecs::{codec_family, encoder_for, layout_for_channels, parse_bitrate};
use crate::graph::{AudioEncode, GraphFragment, LowerContext, StreamKind, Streams, VideoEncode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoTarget {
    /// Codec or encoder name (`h264`, `libx265`, ...).
    #[serde(default)]
    pub codec: Option<String>,
    /// Bitrate cap such as `"2M"`.
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub crf: Option<u32>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub pixel_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioTarget {
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeParams {
    #[serde(default)]
    pub video: Option<VideoTarget>,
    #[serde(default)]
    pub audio: Option<AudioTarget>,
    #[serde(default)]
    pub drop_video: bool,
    #[serde(default)]
    pub drop_audio: bool,
}

/// Round to the nearest even value, as `scale=-2` does.
fn even(x: f64) -> u32 {
    ((x / 2.0).round() * 2.0).max(2.0) as u32
}

impl VideoTarget {
    /// Output dimensions for a source of `width`x`height`.
    fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if width > 0 => (w, even(w as f64 * height as f64 / width as f64)),
            (None, Some(h)) if height > 0 => (even(h as f64 * width as f64 / height as f64), h),
            _ => (width, height),
        }
    }

    fn scale_filter(&self, width: u32, height: u32) -> Option<String> {
        let changed = self.width.is_some_and(|w| w != width) || self.height.is_some_and(|h| h != height);
        if !changed {
            return None;
        }
        Some(match (self.width, self.height) {
            (Some(w), Some(h)) => format!("scale={w}:{h}"),
            (Some(w), None) => format!("scale={w}:-2"),
            (None, Some(h)) => format!("scale=-2:{h}"),
            (None, None) => return None,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(codec) = &self.codec {
            if codec.trim().is_empty() {
                return Err("video codec is empty".into());
            }
        }
        if let Some(b) = &self.bitrate {
            parse_bitrate(b).ok_or_else(|| format!("video bitrate {b:?} is not a bitrate"))?;
        }
        if self.crf.is_some_and(|crf| crf > 63) {
            return Err("crf must be in [0, 63]".into());
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value.is_some_and(|v| v == 0 || v > 16384 || v % 2 != 0) {
                return Err(format!("{name} must be an even value in [2, 16384]"));
            }
        }
        if let Some(fps) = self.frame_rate {
            if !(fps > 0.0 && fps <= 240.0) {
                return Err(format!("frame rate {fps} is outside (0, 240]"));
            }
        }
        Ok(())
    }
}

impl AudioTarget {
    fn format_filter(&self, sample_rate: Option<u32>, channels: u32) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(rate) = self.sample_rate.filter(|r| Some(*r) != sample_rate) {
            parts.push(format!("sample_rates={rate}"));
        }
        if let Some(layout) = self
            .channels
            .filter(|c| *c != channels)
            .and_then(layout_for_channels)
        {
            parts.push(format!("channel_layouts={layout}"));
        }
        (!parts.is_empty()).then(|| format!("aformat={}", parts.join(":")))
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(codec) = &self.codec {
            if codec.trim().is_empty() {
                return Err("audio codec is empty".into());
            }
        }
        if let Some(b) = &self.bitrate {
            parse_bitrate(b).ok_or_else(|| format!("audio bitrate {b:?} is not a bitrate"))?;
        }
        if let Some(rate) = self.sample_rate {
            if !(8_000..=192_000).contains(&rate) {
                return Err(format!("sample rate {rate} is outside [8000, 192000]"));
            }
        }
        if let Some(channels) = self.channels {
            if layout_for_channels(channels).is_none() {
                return Err(format!("{channels} channels has no standard layout"));
            }
        }
        Ok(())
    }
}

impl StageOps for TranscodeParams {
    fn capability(&self) -> Capability {
        Capability::Transcode
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape::NONE)
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let invalid = |msg: String| cf_core::Error::invalid("transcode", msg);
        let shape = passthrough(inputs).shape();

        if let Some(v) = &self.video {
            v.validate().map_err(invalid)?;
            if !shape.video {
                return Err(invalid(format!("video target set but the input is {shape}")));
            }
            if self.drop_video {
                return Err(invalid("video target set together with drop_video".into()));
            }
        }
        if let Some(a) = &self.audio {
            a.validate().map_err(invalid)?;
            if !shape.audio {
                return Err(invalid(format!("audio target set but the input is {shape}")));
            }
            if self.drop_audio {
                return Err(invalid("audio target set together with drop_audio".into()));
            }
        }

        let keeps_video = shape.video && !self.drop_video;
        let keeps_audio = shape.audio && !self.drop_audio;
        if !keeps_video && !keeps_audio {
            return Err(invalid("transcode would drop every stream".into()));
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let mut out = passthrough(inputs);
        if self.drop_video {
            out.video_streams.clear();
        }
        if self.drop_audio {
            out.audio_streams.clear();
        }

        if let (Some(target), Some(v)) = (&self.video, out.video_streams.first_mut()) {
            let (w, h) = target.dimensions(v.width, v.height);
            let recoded = target.codec.as_deref().is_some_and(|c| codec_family(c) != v.codec)
                || (w, h) != (v.width, v.height)
                || target.frame_rate.is_some_and(|f| Some(f) != v.frame_rate);
            if let Some(codec) = &target.codec {
                v.codec = codec_family(codec).to_string();
            }
            v.width = w;
            v.height = h;
            if let Some(fps) = target.frame_rate {
                v.frame_rate = Some(fps);
            }
            let cap = target.bitrate.as_deref().and_then(parse_bitrate);
            v.bitrate = match (cap, v.bitrate) {
                (Some(cap), Some(src)) if !recoded => Some(src.min(cap)),
                (Some(cap), _) => Some(cap),
                (None, src) if !recoded => src,
                (None, _) => None,
            };
        }

        if let (Some(target), Some(a)) = (&self.audio, out.audio_streams.first_mut()) {
            if let Some(codec) = &target.codec {
                a.codec = codec_family(codec).to_string();
            }
            if let Some(rate) = target.sample_rate {
                a.sample_rate = Some(rate);
            }
            if let Some(channels) = target.channels {
                a.channels = channels;
                a.channel_layout = layout_for_channels(channels).map(str::to_string);
            }
            if let Some(cap) = target.bitrate.as_deref().and_then(parse_bitrate) {
                a.bitrate = Some(a.bitrate.map_or(cap, |src| src.min(cap)));
            }
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let source = input.descriptor;
        let mut fragment = GraphFragment::new();

        let mut video = if self.drop_video { None } else { input.streams.video.clone() };
        let mut audio = if self.drop_audio { None } else { input.streams.audio.clone() };

        if let Some((target, pad)) = self.video.as_ref().zip(video.clone()) {
            let src = source.primary_video();
            let mut filters = Vec::new();
            if let Some(scale) = src.and_then(|v| target.scale_filter(v.width, v.height)) {
                filters.push(scale);
            }
            if let Some(fps) = target.frame_rate.filter(|f| src.and_then(|v| v.frame_rate) != Some(*f)) {
                filters.push(format!("fps={}", num(fps)));
            }
            video = Some(if filters.is_empty() {
                pad
            } else {
                fragment.filter(cx, pad, StreamKind::Video, filters.join(","))
            });

            let encode = cx.video_target.get_or_insert_with(VideoEncode::default);
            if let Some(codec) = &target.codec {
                encode.encoder = Some(encoder_for(codec).to_string());
            }
            if let Some(b) = target.bitrate.as_deref().and_then(parse_bitrate) {
                encode.bitrate = Some(b);
            }
            if target.crf.is_some() {
                encode.crf = target.crf;
            }
            if target.preset.is_some() {
                encode.preset = target.preset.clone();
            }
            if target.pixel_format.is_some() {
                encode.pixel_format = target.pixel_format.clone();
            }
        }

        if let Some((target, pad)) = self.audio.as_ref().zip(audio.clone()) {
            let src = source.primary_audio();
            let filter = target.format_filter(
                src.and_then(|a| a.sample_rate),
                src.map_or(0, |a| a.channels),
            );
            audio = Some(match filter {
                Some(f) => fragment.filter(cx, pad, StreamKind::Audio, f),
                None => pad,
            });

            let encode = cx.audio_target.get_or_insert_with(AudioEncode::default);
            if let Some(codec) = &target.codec {
                encode.encoder = Some(encoder_for(codec).to_string());
            }
            if let Some(b) = target.bitrate.as_deref().and_then(parse_bitrate) {
                encode.bitrate = Some(b);
            }
        }

        fragment.output = Streams { video, audio };
        Ok(fragment)
    }
}
