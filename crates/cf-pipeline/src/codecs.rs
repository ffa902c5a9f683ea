//! Codec and container policy.
//!
//! Encoder names (`libx264`) and codec names (`h264`) are different
//! vocabularies; copy eligibility compares codecs, encoding needs encoders.
//! Container tables decide whether a copied stream can be muxed as-is.

use std::path::Path;

use cf_core::config::EncodingConfig;

use crate::graph::StreamKind;

/// The codec an encoder (or codec alias) produces.
pub fn codec_family(name: &str) -> &str {
    match name {
        "libx264" | "h264_nvenc" | "h264_qsv" | "h264_videotoolbox" | "avc" => "h264",
        "libx265" | "hevc_nvenc" | "hevc_qsv" | "hevc_videotoolbox" | "h265" => "hevc",
        "libvpx" => "vp8",
        "libvpx-vp9" => "vp9",
        "libaom-av1" | "libsvtav1" | "librav1e" => "av1",
        "libmp3lame" => "mp3",
        "libopus" => "opus",
        "libvorbis" => "vorbis",
        "libfdk_aac" => "aac",
        other => other,
    }
}

/// The encoder used when a codec name is requested.
pub fn encoder_for(codec: &str) -> &str {
    match codec {
        "h264" | "avc" => "libx264",
        "hevc" | "h265" => "libx265",
        "vp8" => "libvpx",
        "vp9" => "libvpx-vp9",
        "av1" => "libaom-av1",
        "mp3" => "libmp3lame",
        "opus" => "libopus",
        "vorbis" => "libvorbis",
        other => other,
    }
}

/// Lower-cased extension of an output path, `mp4` when absent.
pub fn container_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}

/// Containers that only hold audio.
pub fn is_audio_container(ext: &str) -> bool {
    matches!(
        ext,
        "mp3" | "wav" | "flac" | "m4a" | "aac" | "ogg" | "opus" | "wma"
    )
}

/// Default video encoder for a container.
pub fn default_video_encoder<'a>(ext: &str, encoding: &'a EncodingConfig) -> &'a str {
    match ext {
        "webm" => "libvpx-vp9",
        _ => encoding.video_codec.as_str(),
    }
}

/// Default audio encoder for a container.
pub fn default_audio_encoder<'a>(ext: &str, encoding: &'a EncodingConfig) -> &'a str {
    match ext {
        "mp3" => "libmp3lame",
        "wav" => "pcm_s16le",
        "flac" => "flac",
        "ogg" => "libvorbis",
        "opus" | "webm" => "libopus",
        "m4a" | "aac" => "aac",
        _ => encoding.audio_codec.as_str(),
    }
}

/// Whether `codec` is an encoder that takes no bitrate.
pub fn is_lossless_audio(codec: &str) -> bool {
    codec == "flac" || codec.starts_with("pcm_")
}

/// Whether a container can carry a stream of `codec` without re-encoding.
/// `None` when the container is not in the table.
pub fn container_accepts(ext: &str, kind: StreamKind, codec: &str) -> Option<bool> {
    let accepted: &[&str] = match (ext, kind) {
        ("mkv" | "mka", _) => return Some(true),
        ("mp4" | "m4v", StreamKind::Video) => &["h264", "hevc", "av1", "vp9", "mpeg4"],
        ("mp4" | "m4v" | "m4a", StreamKind::Audio) => {
            &["aac", "mp3", "ac3", "eac3", "opus", "flac", "alac"]
        }
        ("mov", StreamKind::Video) => &["h264", "hevc", "prores", "mjpeg", "mpeg4"],
        ("mov", StreamKind::Audio) => &["aac", "mp3", "ac3", "alac", "pcm_s16le", "pcm_s24le"],
        ("webm", StreamKind::Video) => &["vp8", "vp9", "av1"],
        ("webm", StreamKind::Audio) => &["opus", "vorbis"],
        ("mp3", StreamKind::Audio) => &["mp3"],
        ("flac", StreamKind::Audio) => &["flac"],
        ("ogg", StreamKind::Audio) => &["vorbis", "opus", "flac"],
        ("opus", StreamKind::Audio) => &["opus"],
        ("wav", StreamKind::Audio) => &["pcm_s16le", "pcm_s24le", "pcm_f32le", "pcm_u8"],
        (ext, StreamKind::Video) if is_audio_container(ext) => return Some(false),
        _ => return None,
    };
    Some(accepted.contains(&codec))
}

/// Parse a bitrate such as `"2M"`, `"192k"` or `"800000"` into bits per second.
pub fn parse_bitrate(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, multiplier) = match value.char_indices().last()? {
        (i, 'k' | 'K') => (&value[..i], 1_000.0),
        (i, 'm' | 'M') => (&value[..i], 1_000_000.0),
        _ => (value, 1.0),
    };
    let n: f64 = number.trim().parse().ok()?;
    (n > 0.0 && n.is_finite()).then(|| (n * multiplier).round() as u64)
}

/// ffmpeg channel layout name for a channel count.
pub fn layout_for_channels(channels: u32) -> Option<&'static str> {
    match channels {
        1 => Some("mono"),
        2 => Some("stereo"),
        3 => Some("2.1"),
        4 => Some("quad"),
        6 => Some("5.1"),
        8 => Some("7.1"),
        _ => None,
    }
}
