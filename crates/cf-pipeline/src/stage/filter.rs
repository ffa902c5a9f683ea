//! Typed per-stream filters.

use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, StreamKind, Streams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum VideoFilter {
    /// Resize. `-1`/`-2` on one side keeps the aspect ratio.
    Scale { width: i32, height: i32 },
    Crop {
        width: u32,
        height: u32,
        /// Defaults to centered.
        #[serde(default)]
        x: Option<u32>,
        #[serde(default)]
        y: Option<u32>,
    },
    Rotate { degrees: i32 },
    Flip {
        #[serde(default)]
        horizontal: bool,
        #[serde(default)]
        vertical: bool,
    },
    Denoise {
        #[serde(default = "default_denoise")]
        strength: f64,
    },
    Sharpen { amount: f64 },
    Stabilize,
    Color {
        #[serde(default)]
        brightness: f64,
        #[serde(default = "one")]
        contrast: f64,
        #[serde(default = "one")]
        saturation: f64,
        #[serde(default = "one")]
        gamma: f64,
    },
    Grayscale,
    /// A raw ffmpeg filter expression for this stream.
    Raw { expr: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum AudioFilter {
    Volume { gain_db: f64 },
    Highpass { frequency: f64 },
    Lowpass { frequency: f64 },
    Denoise {
        #[serde(default = "default_noise_floor")]
        noise_floor_db: f64,
    },
    Equalizer {
        frequency: f64,
        #[serde(default = "default_eq_width")]
        width_hz: f64,
        gain_db: f64,
    },
    Raw { expr: String },
}

fn one() -> f64 {
    1.0
}

fn default_denoise() -> f64 {
    4.0
}

fn default_noise_floor() -> f64 {
    -25.0
}

fn default_eq_width() -> f64 {
    200.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub video: Vec<VideoFilter>,
    #[serde(default)]
    pub audio: Vec<AudioFilter>,
}

fn check(ok: bool, msg: impl FnOnce() -> String) -> cf_core::Result<()> {
    if ok {
        Ok(())
    } else {
        Err(cf_core::Error::invalid("filter", msg()))
    }
}

/// Raw expressions must stay inside a single chain.
fn check_raw(expr: &str) -> cf_core::Result<()> {
    check(!expr.trim().is_empty(), || "raw filter expression is empty".into())?;
    check(!expr.contains([';', '[', ']']), || {
        format!("raw filter '{expr}' may not contain ';' or pad labels")
    })
}

impl VideoFilter {
    fn validate(&self, source: &MediaDescriptor) -> cf_core::Result<()> {
        match self {
            VideoFilter::Scale { width, height } => {
                let valid = |d: i32| d == -1 || d == -2 || (1..=16384).contains(&d);
                check(valid(*width) && valid(*height), || {
                    format!("scale {width}x{height} is out of range")
                })?;
                check(*width > 0 || *height > 0, || "scale needs at least one fixed side".into())
            }
            VideoFilter::Crop { width, height, x, y } => {
                check(*width > 0 && *height > 0, || "crop size must be positive".into())?;
                if let Some(v) = source.primary_video().filter(|v| v.width > 0 && v.height > 0) {
                    let x = x.unwrap_or(0);
                    let y = y.unwrap_or(0);
                    check(x + width <= v.width && y + height <= v.height, || {
                        format!(
                            "crop {width}x{height}+{x}+{y} exceeds the {}x{} frame",
                            v.width, v.height
                        )
                    })?;
                }
                Ok(())
            }
            VideoFilter::Rotate { degrees } => check((-360..=360).contains(degrees), || {
                format!("rotation {degrees} is outside -360..360")
            }),
            VideoFilter::Flip { horizontal, vertical } => {
                check(*horizontal || *vertical, || "flip needs a direction".into())
            }
            VideoFilter::Denoise { strength } => check((0.0..=30.0).contains(strength), || {
                format!("denoise strength {strength} is outside 0..30")
            }),
            VideoFilter::Sharpen { amount } => check((-2.0..=5.0).contains(amount), || {
                format!("sharpen amount {amount} is outside -2..5")
            }),
            VideoFilter::Color {
                brightness,
                contrast,
                saturation,
                gamma,
            } => {
                check((-1.0..=1.0).contains(brightness), || {
                    format!("brightness {brightness} is outside -1..1")
                })?;
                check((0.0..=4.0).contains(contrast), || format!("contrast {contrast} is outside 0..4"))?;
                check((0.0..=3.0).contains(saturation), || {
                    format!("saturation {saturation} is outside 0..3")
                })?;
                check((0.1..=10.0).contains(gamma), || format!("gamma {gamma} is outside 0.1..10"))
            }
            VideoFilter::Stabilize | VideoFilter::Grayscale => Ok(()),
            VideoFilter::Raw { expr } => check_raw(expr),
        }
    }

    fn expr(&self) -> String {
        match self {
            VideoFilter::Scale { width, height } => format!("scale={width}:{height}"),
            VideoFilter::Crop { width, height, x, y } => {
                let x = x.map_or_else(|| "(in_w-out_w)/2".to_string(), |x| x.to_string());
                let y = y.map_or_else(|| "(in_h-out_h)/2".to_string(), |y| y.to_string());
                format!("crop={width}:{height}:{x}:{y}")
            }
            VideoFilter::Rotate { degrees } => match degrees.rem_euclid(360) {
                0 => "null".to_string(),
                90 => "transpose=1".to_string(),
                180 => "transpose=1,transpose=1".to_string(),
                270 => "transpose=2".to_string(),
                d => format!("rotate={d}*PI/180:fillcolor=black"),
            },
            VideoFilter::Flip { horizontal, vertical } => match (horizontal, vertical) {
                (true, true) => "hflip,vflip".to_string(),
                (true, false) => "hflip".to_string(),
                _ => "vflip".to_string(),
            },
            VideoFilter::Denoise { strength } => format!("hqdn3d={}", num(*strength)),
            VideoFilter::Sharpen { amount } => format!("unsharp=5:5:{}:5:5:0", num(*amount)),
            VideoFilter::Stabilize => "deshake".to_string(),
            VideoFilter::Color {
                brightness,
                contrast,
                saturation,
                gamma,
            } => format!(
                "eq=brightness={}:contrast={}:saturation={}:gamma={}",
                num(*brightness),
                num(*contrast),
                num(*saturation),
                num(*gamma)
            ),
            VideoFilter::Grayscale => "hue=s=0".to_string(),
            VideoFilter::Raw { expr } => expr.trim().to_string(),
        }
    }

    /// Frame size after this filter, when it can be predicted.
    fn resize(&self, (w, h): (u32, u32)) -> (u32, u32) {
        let keep = |fixed: i32, src_fixed: u32, src_other: u32| -> u32 {
            if src_fixed == 0 {
                return 0;
            }
            let v = (src_other as f64 * fixed as f64 / src_fixed as f64).round() as u32;
            v + v % 2
        };
        match self {
            VideoFilter::Scale { width, height } => match (*width > 0, *height > 0) {
                (true, true) => (*width as u32, *height as u32),
                (true, false) => (*width as u32, keep(*width, w, h)),
                (false, true) => (keep(*height, h, w), *height as u32),
                (false, false) => (w, h),
            },
            VideoFilter::Crop { width, height, .. } => (*width, *height),
            VideoFilter::Rotate { degrees } if matches!(degrees.rem_euclid(360), 90 | 270) => (h, w),
            _ => (w, h),
        }
    }
}

impl AudioFilter {
    fn validate(&self, source: &MediaDescriptor) -> cf_core::Result<()> {
        let nyquist = source
            .primary_audio()
            .and_then(|a| a.sample_rate)
            .map_or(96_000.0, |r| r as f64 / 2.0);
        let freq = |f: f64| {
            check(f > 0.0 && f < nyquist, || {
                format!("frequency {f} Hz is outside 0..{nyquist} Hz")
            })
        };
        match self {
            AudioFilter::Volume { gain_db } => check((-60.0..=60.0).contains(gain_db), || {
                format!("gain {gain_db} dB is outside -60..60")
            }),
            AudioFilter::Highpass { frequency } | AudioFilter::Lowpass { frequency } => freq(*frequency),
            AudioFilter::Denoise { noise_floor_db } => {
                check((-80.0..=-20.0).contains(noise_floor_db), || {
                    format!("noise floor {noise_floor_db} dB is outside -80..-20")
                })
            }
            AudioFilter::Equalizer {
                frequency,
                width_hz,
                gain_db,
            } => {
                freq(*frequency)?;
                check(*width_hz > 0.0, || "equalizer width must be positive".into())?;
                check((-30.0..=30.0).contains(gain_db), || {
                    format!("equalizer gain {gain_db} dB is outside -30..30")
                })
            }
            AudioFilter::Raw { expr } => check_raw(expr),
        }
    }

    fn expr(&self) -> String {
        match self {
            AudioFilter::Volume { gain_db } => format!("volume={}dB", num(*gain_db)),
            AudioFilter::Highpass { frequency } => format!("highpass=f={}", num(*frequency)),
            AudioFilter::Lowpass { frequency } => format!("lowpass=f={}", num(*frequency)),
            AudioFilter::Denoise { noise_floor_db } => format!("afftdn=nf={}", num(*noise_floor_db)),
            AudioFilter::Equalizer {
                frequency,
                width_hz,
                gain_db,
            } => format!(
                "equalizer=f={}:t=h:w={}:g={}",
                num(*frequency),
                num(*width_hz),
                num(*gain_db)
            ),
            AudioFilter::Raw { expr } => expr.trim().to_string(),
        }
    }
}

impl StageOps for FilterParams {
    fn capability(&self) -> Capability {
        Capability::Filter
    }

    fn arity(&self) -> Arity {
        Arity::single(StreamShape {
            video: !self.video.is_empty(),
            audio: !self.audio.is_empty(),
        })
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let source = passthrough(inputs);
        check(!self.video.is_empty() || !self.audio.is_empty(), || {
            "filter stage has no filters".into()
        })?;
        for f in &self.video {
            f.validate(&source)?;
        }
        for f in &self.audio {
            f.validate(&source)?;
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let mut out = passthrough(inputs);
        if let Some(v) = out.video_streams.first_mut() {
            let size = self.video.iter().fold((v.width, v.height), |size, f| f.resize(size));
            if !self.video.is_empty() {
                v.bitrate = None;
            }
            (v.width, v.height) = size;
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let input = &inputs[0];
        let mut fragment = GraphFragment::new();

        let video = match (&input.streams.video, self.video.is_empty()) {
            (Some(pad), false) => {
                let chain: Vec<String> = self.video.iter().map(VideoFilter::expr).collect();
                Some(fragment.filter(cx, pad.clone(), StreamKind::Video, chain.join(",")))
            }
            (pad, _) => pad.clone(),
        };
        let audio = match (&input.streams.audio, self.audio.is_empty()) {
            (Some(pad), false) => {
                let chain: Vec<String> = self.audio.iter().map(AudioFilter::expr).collect();
                Some(fragment.filter(cx, pad.clone(), StreamKind::Audio, chain.join(",")))
            }
            (pad, _) => pad.clone(),
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

    #[test]
    fn parses_typed_filters() {
        let json = r#"{"video": [{"filter": "scale", "width": 1280, "height": -2},
                                 {"filter": "grayscale"}],
                       "audio": [{"filter": "highpass", "frequency": 80}]}"#;
        let params: FilterParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.video.len(), 2);
        assert!(params.validate(&[fixtures::av(10.0)]).is_ok());
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let source = fixtures::av(10.0);
        let bad = [
            VideoFilter::Crop { width: 4000, height: 100, x: None, y: None },
            VideoFilter::Sharpen { amount: 9.0 },
            VideoFilter::Scale { width: -2, height: -2 },
            VideoFilter::Raw { expr: "scale=2:2[x];[x]null".into() },
        ];
        for filter in bad {
            let params = FilterParams { video: vec![filter], audio: vec![] };
            let err = params.validate(&[source.clone()]).unwrap_err();
            assert_eq!(err.kind(), cf_core::ErrorKind::InvalidParameter);
        }

        let lowpass = FilterParams {
            video: vec![],
            audio: vec![AudioFilter::Lowpass { frequency: 30_000.0 }],
        };
        assert!(lowpass.validate(&[source]).is_err());
    }

    #[test]
    fn audio_filters_require_audio() {
        let params = FilterParams {
            video: vec![],
            audio: vec![AudioFilter::Volume { gain_db: 3.0 }],
        };
        assert!(params.arity().check("filter", &[StreamShape::VIDEO]).is_err());
        assert!(params.arity().check("filter", &[StreamShape::AV]).is_ok());
    }

    #[test]
    fn predicts_geometry() {
        let params = FilterParams {
            video: vec![
                VideoFilter::Scale { width: 1280, height: -2 },
                VideoFilter::Rotate { degrees: 90 },
            ],
            audio: vec![],
        };
        let out = params.describe_output(&[fixtures::av(10.0)]);
        let v = out.primary_video().unwrap();
        assert_eq!((v.width, v.height), (720, 1280));
    }

    #[test]
    fn lowers_each_kind_into_one_chain() {
        let source = fixtures::av(10.0);
        let mut cx = LowerContext::new(EncodingConfig::default());
        let streams = cx.add_input(InputSpec::file("/media/in.mp4"), source.clone());
        let params = FilterParams {
            video: vec![
                VideoFilter::Flip { horizontal: true, vertical: false },
                VideoFilter::Color { brightness: 0.1, contrast: 1.2, saturation: 1.0, gamma: 1.0 },
            ],
            audio: vec![],
        };
        let fragment = params
            .lower(&mut cx, &[StageInput { streams: streams.clone(), descriptor: &source }])
            .unwrap();
        assert_eq!(fragment.chains.len(), 1);
        assert_eq!(
            fragment.chains[0].filters,
            "hflip,eq=brightness=0.1:contrast=1.2:saturation=1:gamma=1"
        );
        // Audio is untouched and stays copyable.
        assert_eq!(fragment.output.audio, streams.audio);
    }
}
