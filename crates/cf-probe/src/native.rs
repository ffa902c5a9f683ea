//! Pure-Rust [`Prober`] implementation.
//!
//! Uses the `matroska` crate for MKV/WebM files and `mp4parse` for MP4/MOV
//! files. Codec identifiers are mapped onto ffmpeg's codec names so that
//! descriptors from this prober compare equal to ffprobe's.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use cf_core::Error;

use crate::prober::{ensure_exists, Prober};
use crate::types::{AudioStream, MediaDescriptor, VideoStream};

/// A [`Prober`] that needs no external tools.
///
/// Supports Matroska, WebM, MP4, M4V and MOV. Bitrates are not reported
/// because neither parser exposes them without a full sample scan.
pub struct NativeProber;

impl NativeProber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for NativeProber {
    fn name(&self) -> &'static str {
        "native"
    }

    fn supports(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => matches!(
                ext.to_lowercase().as_str(),
                "mkv" | "webm" | "mp4" | "m4v" | "mov"
            ),
            None => false,
        }
    }

    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        ensure_exists(path)?;
        match detect_container(path)? {
            Container::Matroska => probe_mkv(path),
            Container::Mp4 => probe_mp4(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Matroska,
    Mp4,
}

// ---------------------------------------------------------------------------
// Container detection
// ---------------------------------------------------------------------------

/// Detect container format from file magic bytes, with extension fallback.
fn detect_container(path: &Path) -> cf_core::Result<Container> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 12];
    let read = file.read(&mut magic)?;
    if read >= 8 {
        if magic[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            return Ok(Container::Matroska);
        }
        if matches!(&magic[4..8], b"ftyp" | b"moov" | b"mdat" | b"free" | b"wide") {
            return Ok(Container::Mp4);
        }
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => match ext.to_lowercase().as_str() {
            "mkv" | "webm" => Ok(Container::Matroska),
            "mp4" | "m4v" | "mov" => Ok(Container::Mp4),
            other => Err(Error::unreadable(
                path,
                format!("unsupported container extension: {other}"),
            )),
        },
        None => Err(Error::unreadable(path, "unable to detect container format")),
    }
}

// ---------------------------------------------------------------------------
// Matroska
// ---------------------------------------------------------------------------

fn probe_mkv(path: &Path) -> cf_core::Result<MediaDescriptor> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mkv = matroska::Matroska::open(BufReader::new(file))
        .map_err(|e| Error::unreadable(path, format!("MKV parse error: {e}")))?;

    let duration = mkv.info.duration.map(|d| d.as_secs_f64()).unwrap_or(0.0);
    let mut descriptor = MediaDescriptor::new(path, duration);
    descriptor.container = Some("matroska".into());
    descriptor.file_size = file_size;

    for track in &mkv.tracks {
        match &track.settings {
            matroska::Settings::Video(video) => {
                let frame_rate = track
                    .default_duration
                    .filter(|d| d.as_secs_f64() > 0.0)
                    .map(|d| 1.0 / d.as_secs_f64());

                descriptor.video_streams.push(VideoStream {
                    codec: mkv_video_codec(&track.codec_id),
                    width: video.pixel_width as u32,
                    height: video.pixel_height as u32,
                    frame_rate,
                    bitrate: None,
                });
            }
            matroska::Settings::Audio(audio) => {
                let channels = audio.channels as u32;
                descriptor.audio_streams.push(AudioStream {
                    codec: mkv_audio_codec(&track.codec_id),
                    sample_rate: Some(audio.sample_rate as u32),
                    channels,
                    channel_layout: default_layout(channels),
                    bitrate: None,
                });
            }
            matroska::Settings::None => {}
        }
    }

    Ok(descriptor)
}

fn mkv_video_codec(codec_id: &str) -> String {
    match codec_id {
        "V_MPEG4/ISO/AVC" => "h264".into(),
        "V_MPEGH/ISO/HEVC" => "hevc".into(),
        "V_AV1" => "av1".into(),
        "V_VP9" => "vp9".into(),
        "V_VP8" => "vp8".into(),
        "V_MPEG2" => "mpeg2video".into(),
        "V_MPEG4/ISO/ASP" | "V_MPEG4/ISO/SP" => "mpeg4".into(),
        other => other.strip_prefix("V_").unwrap_or(other).to_lowercase(),
    }
}

fn mkv_audio_codec(codec_id: &str) -> String {
    match codec_id {
        id if id.starts_with("A_AAC") => "aac".into(),
        "A_AC3" => "ac3".into(),
        "A_EAC3" => "eac3".into(),
        "A_DTS" | "A_DTS/EXPRESS" | "A_DTS/LOSSLESS" => "dts".into(),
        "A_TRUEHD" => "truehd".into(),
        "A_FLAC" => "flac".into(),
        "A_OPUS" => "opus".into(),
        "A_VORBIS" => "vorbis".into(),
        "A_MPEG/L3" => "mp3".into(),
        "A_PCM/INT/LIT" => "pcm_s16le".into(),
        other => other.strip_prefix("A_").unwrap_or(other).to_lowercase(),
    }
}

// ---------------------------------------------------------------------------
// MP4
// ---------------------------------------------------------------------------

fn probe_mp4(path: &Path) -> cf_core::Result<MediaDescriptor> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let mut cursor = std::io::Cursor::new(&buffer);
    let context = mp4parse::read_mp4(&mut cursor)
        .map_err(|e| Error::unreadable(path, format!("MP4 parse error: {e:?}")))?;

    let mut descriptor = MediaDescriptor::new(path, mp4_duration(&context).unwrap_or(0.0));
    descriptor.container = Some("mov,mp4".into());
    descriptor.file_size = file_size;

    for track in &context.tracks {
        match track.track_type {
            mp4parse::TrackType::Video => {
                if let Some(v) = mp4_video_stream(track) {
                    descriptor.video_streams.push(v);
                }
            }
            mp4parse::TrackType::Audio => {
                if let Some(a) = mp4_audio_stream(track) {
                    descriptor.audio_streams.push(a);
                }
            }
            _ => {}
        }
    }

    Ok(descriptor)
}

/// Longest track duration, in seconds.
fn mp4_duration(context: &mp4parse::MediaContext) -> Option<f64> {
    let global_ts = context.timescale?;
    context
        .tracks
        .iter()
        .filter_map(|t| {
            let dur = t.duration?;
            let scale = t.timescale.map(|s| s.0).unwrap_or(global_ts.0);
            if scale == 0 {
                return None;
            }
            Some(dur.0 as f64 / scale as f64)
        })
        .reduce(f64::max)
}

fn mp4_video_stream(track: &mp4parse::Track) -> Option<VideoStream> {
    let stsd = track.stsd.as_ref()?;
    match stsd.descriptions.first()? {
        mp4parse::SampleEntry::Video(ve) => {
            let codec = match &ve.codec_specific {
                mp4parse::VideoCodecSpecific::AVCConfig(_) => "h264",
                mp4parse::VideoCodecSpecific::AV1Config(_) => "av1",
                mp4parse::VideoCodecSpecific::VPxConfig(_) => "vp9",
                mp4parse::VideoCodecSpecific::H263Config(_) => "h263",
                mp4parse::VideoCodecSpecific::ESDSConfig(_) => "mpeg4",
                #[allow(unreachable_patterns)]
                _ => "unknown",
            };
            Some(VideoStream::new(codec, ve.width as u32, ve.height as u32))
        }
        _ => None,
    }
}

fn mp4_audio_stream(track: &mp4parse::Track) -> Option<AudioStream> {
    let stsd = track.stsd.as_ref()?;
    match stsd.descriptions.first()? {
        mp4parse::SampleEntry::Audio(ae) => {
            let codec = match &ae.codec_specific {
                mp4parse::AudioCodecSpecific::ES_Descriptor(_) => "aac",
                mp4parse::AudioCodecSpecific::FLACSpecificBox(_) => "flac",
                mp4parse::AudioCodecSpecific::OpusSpecificBox(_) => "opus",
                mp4parse::AudioCodecSpecific::ALACSpecificBox(_) => "alac",
                mp4parse::AudioCodecSpecific::MP3 => "mp3",
                mp4parse::AudioCodecSpecific::LPCM => "pcm_s16le",
                #[allow(unreachable_patterns)]
                _ => "unknown",
            };
            let channels = ae.channelcount;
            Some(AudioStream {
                codec: codec.into(),
                sample_rate: Some(ae.samplerate as u32),
                channels,
                channel_layout: default_layout(channels),
                bitrate: None,
            })
        }
        _ => None,
    }
}

fn default_layout(channels: u32) -> Option<String> {
    match channels {
        1 => Some("mono".into()),
        2 => Some("stereo".into()),
        6 => Some("5.1".into()),
        8 => Some("7.1".into()),
        _ => None,
    }
}
