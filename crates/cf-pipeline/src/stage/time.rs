//! Time positions as agents write them.

use serde::{Deserialize, Serialize};

/// A position in a stream: seconds, a `HH:MM:SS(.fff)` / `MM:SS` timestamp,
/// or a frame count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Seconds(f64),
    Timestamp(String),
    Frames { frames: u64 },
}

impl TimeSpec {
    /// Normalize to seconds. Frame counts need the stream's frame rate.
    pub fn resolve(&self, frame_rate: Option<f64>) -> Result<f64, String> {
        let secs = match self {
            TimeSpec::Seconds(s) => *s,
            TimeSpec::Timestamp(ts) => parse_timestamp(ts)?,
            TimeSpec::Frames { frames } => match frame_rate.filter(|r| *r > 0.0) {
                Some(rate) => *frames as f64 / rate,
                None => return Err("frame positions need a video stream with a known frame rate".into()),
            },
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("time position must be non-negative, got {secs}"));
        }
        Ok(secs)
    }
}

/// Parse `SS(.fff)`, `MM:SS(.fff)` or `HH:MM:SS(.fff)`.
pub fn parse_timestamp(ts: &str) -> Result<f64, String> {
    let parts: Vec<&str> = ts.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("invalid timestamp '{ts}'"));
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let value: f64 = part
            .parse()
            .map_err(|_| format!("invalid timestamp '{ts}'"))?;
        if value < 0.0 || !value.is_finite() {
            return Err(format!("invalid timestamp '{ts}'"));
        }
        // Minutes and seconds fields must stay below 60 unless they lead.
        if i > 0 && value >= 60.0 {
            return Err(format!("invalid timestamp '{ts}': field out of range"));
        }
        total = total * 60.0 + value;
    }
    Ok(total)
}
