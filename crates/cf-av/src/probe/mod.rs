//! Probe backends that shell out to external tools.

pub mod ffprobe;

pub use self::ffprobe::FfprobeProber;
