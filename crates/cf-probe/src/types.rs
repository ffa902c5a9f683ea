//! Core types for media probe results.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Normalized, immutable snapshot of a media file's streams.
///
/// `duration_seconds` is never negative; constructors clamp it. Either stream
/// list may be empty (audio-only or video-only files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Path to the probed file.
    pub path: PathBuf,
    /// Container format name as reported by the prober (e.g. "matroska").
    pub container: Option<String>,
    /// File size in bytes.
    pub file_size: u64,
    /// Total duration in seconds.
    pub duration_seconds: f64,
    /// Video streams in file order.
    pub video_streams: Vec<VideoStream>,
    /// Audio streams in file order.
    pub audio_streams: Vec<AudioStream>,
}

/// A video stream within a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    /// Codec name in ffmpeg's vocabulary ("h264", "hevc", ...).
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second.
    pub frame_rate: Option<f64>,
    /// Bits per second.
    pub bitrate: Option<u64>,
}

/// An audio stream within a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    /// Codec name in ffmpeg's vocabulary ("aac", "opus", ...).
    pub codec: String,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    pub channels: u32,
    /// Channel layout name ("stereo", "5.1(side)", ...).
    pub channel_layout: Option<String>,
    /// Bits per second.
    pub bitrate: Option<u64>,
}

/// Which stream kinds a file (or a pipeline slot) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamShape {
    pub video: bool,
    pub audio: bool,
}

impl StreamShape {
    pub const VIDEO: StreamShape = StreamShape { video: true, audio: false };
    pub const AUDIO: StreamShape = StreamShape { video: false, audio: true };
    pub const AV: StreamShape = StreamShape { video: true, audio: true };
    pub const NONE: StreamShape = StreamShape { video: false, audio: false };

    /// `true` if every kind in `required` is present in `self`.
    pub fn covers(&self, required: StreamShape) -> bool {
        (!required.video || self.video) && (!required.audio || self.audio)
    }

    pub fn is_empty(&self) -> bool {
        !self.video && !self.audio
    }
}

impl fmt::Display for StreamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.video, self.audio) {
            (true, true) => write!(f, "audio+video"),
            (true, false) => write!(f, "video-only"),
            (false, true) => write!(f, "audio-only"),
            (false, false) => write!(f, "no streams"),
        }
    }
}

impl MediaDescriptor {
    /// Create a descriptor with no streams. Negative or non-finite durations
    /// are clamped to zero.
    pub fn new(path: impl AsRef<Path>, duration_seconds: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            container: None,
            file_size: 0,
            duration_seconds: clamp_duration(duration_seconds),
            video_streams: Vec::new(),
            audio_streams: Vec::new(),
        }
    }

    /// Builder: append a video stream.
    pub fn with_video(mut self, stream: VideoStream) -> Self {
        self.video_streams.push(stream);
        self
    }

    /// Builder: append an audio stream.
    pub fn with_audio(mut self, stream: AudioStream) -> Self {
        self.audio_streams.push(stream);
        self
    }

    /// Builder: replace the duration, clamping as in [`MediaDescriptor::new`].
    pub fn with_duration(mut self, duration_seconds: f64) -> Self {
        self.duration_seconds = clamp_duration(duration_seconds);
        self
    }

    pub fn primary_video(&self) -> Option<&VideoStream> {
        self.video_streams.first()
    }

    pub fn primary_audio(&self) -> Option<&AudioStream> {
        self.audio_streams.first()
    }

    pub fn shape(&self) -> StreamShape {
        StreamShape {
            video: !self.video_streams.is_empty(),
            audio: !self.audio_streams.is_empty(),
        }
    }

    /// Duration of one frame of the primary video stream, if known.
    pub fn frame_interval(&self) -> Option<f64> {
        self.primary_video()
            .and_then(|v| v.frame_rate)
            .filter(|fps| *fps > 0.0)
            .map(|fps| 1.0 / fps)
    }
}

impl VideoStream {
    pub fn new(codec: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            codec: codec.into(),
            width,
            height,
            frame_rate: None,
            bitrate: None,
        }
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn with_bitrate(mut self, bps: u64) -> Self {
        self.bitrate = Some(bps);
        self
    }
}

impl AudioStream {
    pub fn new(codec: impl Into<String>, sample_rate: u32, channels: u32) -> Self {
        Self {
            codec: codec.into(),
            sample_rate: Some(sample_rate),
            channels,
            channel_layout: None,
            bitrate: None,
        }
    }

    pub fn with_bitrate(mut self, bps: u64) -> Self {
        self.bitrate = Some(bps);
        self
    }
}

fn clamp_duration(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_duration_is_clamped() {
        let d = MediaDescriptor::new("/a.mp4", -3.0);
        assert_eq!(d.duration_seconds, 0.0);
        let d = MediaDescriptor::new("/a.mp4", f64::NAN);
        assert_eq!(d.duration_seconds, 0.0);
    }

    #[test]
    fn shape_reflects_streams() {
        let audio_only = MediaDescriptor::new("/a.wav", 5.0).with_audio(AudioStream::new("pcm_s16le", 48000, 2));
        assert_eq!(audio_only.shape(), StreamShape::AUDIO);
        assert!(audio_only.primary_video().is_none());
        assert!(audio_only.frame_interval().is_none());

        let av = audio_only.with_video(VideoStream::new("h264", 1920, 1080).with_frame_rate(25.0));
        assert_eq!(av.shape(), StreamShape::AV);
        assert!((av.frame_interval().unwrap() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn shape_covers() {
        assert!(StreamShape::AV.covers(StreamShape::VIDEO));
        assert!(StreamShape::AV.covers(StreamShape::NONE));
        assert!(!StreamShape::AUDIO.covers(StreamShape::VIDEO));
        assert_eq!(StreamShape::AUDIO.to_string(), "audio-only");
    }

    #[test]
    fn serde_roundtrip_keeps_optional_fields() {
        let d = MediaDescriptor::new("/clip.mkv", 12.5)
            .with_video(VideoStream::new("hevc", 3840, 2160).with_bitrate(20_000_000));
        let json = serde_json::to_string(&d).unwrap();
        let back: MediaDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
