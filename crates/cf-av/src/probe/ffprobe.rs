//! FFprobe-based [`cf_probe::Prober`] implementation.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into [`cf_probe::MediaDescriptor`].

use std::path::{Path, PathBuf};
use std::process::Command;

use cf_probe::{ensure_exists, AudioStream, MediaDescriptor, Prober, VideoStream};
use serde::Deserialize;

/// A prober backed by the `ffprobe` CLI.
///
/// Probing is synchronous: ffprobe only reads container headers, so it is
/// run with `std::process` rather than through the async command runner.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Create a prober that finds ffprobe on `PATH`.
    pub fn from_path() -> Option<Self> {
        which::which("ffprobe").ok().map(Self::new)
    }
}

impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn supports(&self, _path: &Path) -> bool {
        // ffprobe sniffs content; extensions do not matter.
        true
    }

    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        ensure_exists(path)?;

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .map_err(|e| cf_core::Error::tool("ffprobe", format!("failed to spawn: {e}")))?;

        if !output.status.success() {
            return Err(cf_core::Error::unreadable(
                path,
                format!("ffprobe exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ff: FfprobeOutput = serde_json::from_str(&stdout)
            .map_err(|e| cf_core::Error::unreadable(path, format!("ffprobe JSON parse error: {e}")))?;

        parse_ffprobe_output(path, ff)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    sample_rate: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_ffprobe_output(path: &Path, output: FfprobeOutput) -> cf_core::Result<MediaDescriptor> {
    let Some(format) = output.format else {
        return Err(cf_core::Error::unreadable(path, "ffprobe reported no container"));
    };

    // Some containers only carry per-stream durations.
    let duration = format
        .duration
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            output
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let mut descriptor = MediaDescriptor::new(path, duration);
    descriptor.container = format.format_name;
    descriptor.file_size = format.size.and_then(|s| s.parse().ok()).unwrap_or(0);
    let container_bitrate: Option<u64> = format.bit_rate.and_then(|s| s.parse().ok());

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            // Cover art is reported as a video stream; it is not one.
            Some("video") if stream.disposition.attached_pic == 0 => {
                let frame_rate = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
                descriptor.video_streams.push(VideoStream {
                    codec: stream.codec_name.unwrap_or_default(),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    frame_rate,
                    bitrate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
            }
            Some("audio") => {
                descriptor.audio_streams.push(AudioStream {
                    codec: stream.codec_name.unwrap_or_default(),
                    sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    channels: stream.channels.unwrap_or(2),
                    channel_layout: stream.channel_layout,
                    bitrate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
            }
            _ => {}
        }
    }

    // A lone video stream without its own bitrate (common in MKV) takes the
    // container rate as an upper bound.
    if descriptor.audio_streams.is_empty() && descriptor.video_streams.len() == 1 {
        if let Some(v) = descriptor.video_streams.first_mut() {
            v.bitrate = v.bitrate.or(container_bitrate);
        }
    }

    Ok(descriptor)
}

/// Parse `"24000/1001"` or `"25"` into frames per second. `0/0` is `None`.
fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let fps = match rate_str.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate_str.parse().ok()?,
    };
    (fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001", "bit_rate": "4500000"},
            {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000",
             "channels": 2, "channel_layout": "stereo", "bit_rate": "128000"},
            {"codec_type": "video", "codec_name": "mjpeg", "width": 600, "height": 600,
             "disposition": {"attached_pic": 1}}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "120.021000",
                   "size": "68000000", "bit_rate": "4630000"}
    }"#;

    #[test]
    fn frame_rate_fraction() {
        assert!((parse_frame_rate("24000/1001").unwrap() - 23.976).abs() < 0.01);
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[test]
    fn parses_sample_output() {
        let ff: FfprobeOutput = serde_json::from_str(SAMPLE).unwrap();
        let d = parse_ffprobe_output(Path::new("/media/a.mp4"), ff).unwrap();

        assert!((d.duration_seconds - 120.021).abs() < 1e-6);
        assert_eq!(d.file_size, 68_000_000);
        assert_eq!(d.video_streams.len(), 1, "cover art must be skipped");

        let v = d.primary_video().unwrap();
        assert_eq!(v.codec, "h264");
        assert_eq!((v.width, v.height), (1920, 1080));
        assert!((v.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(v.bitrate, Some(4_500_000));

        let a = d.primary_audio().unwrap();
        assert_eq!(a.sample_rate, Some(48000));
        assert_eq!(a.channel_layout.as_deref(), Some("stereo"));
    }

    #[test]
    fn audio_only_is_valid() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3",
            "sample_rate": "44100", "channels": 1}],
            "format": {"format_name": "mp3", "duration": "3.5"}}"#;
        let ff: FfprobeOutput = serde_json::from_str(json).unwrap();
        let d = parse_ffprobe_output(Path::new("/a.mp3"), ff).unwrap();
        assert!(d.video_streams.is_empty());
        assert_eq!(d.audio_streams[0].channels, 1);
    }

    #[test]
    fn duration_falls_back_to_streams() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "vp9",
            "width": 640, "height": 360, "duration": "9.96"}],
            "format": {"format_name": "matroska,webm", "bit_rate": "800000"}}"#;
        let ff: FfprobeOutput = serde_json::from_str(json).unwrap();
        let d = parse_ffprobe_output(Path::new("/a.webm"), ff).unwrap();
        assert!((d.duration_seconds - 9.96).abs() < 1e-9);
        assert_eq!(d.primary_video().unwrap().bitrate, Some(800_000));
    }

    #[test]
    fn missing_format_is_unreadable() {
        let ff: FfprobeOutput = serde_json::from_str(r#"{"streams": []}"#).unwrap();
        let err = parse_ffprobe_output(Path::new("/x.bin"), ff).unwrap_err();
        assert_eq!(err.kind(), cf_core::ErrorKind::UnreadableMedia);
    }

    #[test]
    fn probe_missing_file_is_not_found_without_spawning() {
        let prober = FfprobeProber::new(PathBuf::from("/nonexistent/ffprobe"));
        let err = prober.probe(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert_eq!(err.kind(), cf_core::ErrorKind::NotFound);
    }
}
