//! Multi-track audio mixing with optional sidechain ducking.

use cf_probe::{AudioStream, MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use super::{num, Arity, Capability, StageInput, StageOps};
use crate::graph::{GraphFragment, LowerContext, Pad, StreamKind, Streams};

/// Per-input settings, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixInput {
    #[serde(default)]
    pub gain_db: f64,
    /// Stereo balance, -1 (left) to 1 (right).
    #[serde(default)]
    pub pan: f64,
    /// Start offset in seconds.
    #[serde(default)]
    pub delay: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixDuration {
    #[default]
    Longest,
    Shortest,
    First,
}

impl MixDuration {
    fn as_str(self) -> &'static str {
        match self {
            MixDuration::Longest => "longest",
            MixDuration::Shortest => "shortest",
            MixDuration::First => "first",
        }
    }
}

fn default_threshold() -> f64 {
    -30.0
}
fn default_ratio() -> f64 {
    4.0
}
fn default_attack() -> f64 {
    5.0
}
fn default_release() -> f64 {
    50.0
}
fn default_makeup() -> f64 {
    1.0
}

/// Attenuate every other track while `foreground` is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ducking {
    /// Index of the keying input.
    pub foreground: usize,
    #[serde(default = "default_threshold")]
    pub threshold_db: f64,
    #[serde(default = "default_ratio")]
    pub ratio: f64,
    #[serde(default = "default_attack")]
    pub attack_ms: f64,
    #[serde(default = "default_release")]
    pub release_ms: f64,
    #[serde(default = "default_makeup")]
    pub makeup: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixParams {
    /// Missing entries mix at unity gain, centered, without delay.
    #[serde(default)]
    pub tracks: Vec<MixInput>,
    #[serde(default)]
    pub duration: MixDuration,
    /// Apply `dynaudnorm` to the result.
    #[serde(default)]
    pub normalize: bool,
    #[serde(default)]
    pub ducking: Option<Ducking>,
    /// Input whose video passes through untouched.
    #[serde(default)]
    pub carry_video: Option<usize>,
}

const MIX_RATE: u32 = 48_000;

impl MixParams {
    fn track(&self, i: usize) -> MixInput {
        self.tracks.get(i).cloned().unwrap_or_default()
    }

    /// Indices of the inputs that contribute audio.
    fn audio_inputs(&self, inputs: &[MediaDescriptor]) -> Vec<usize> {
        inputs
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.audio_streams.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    fn amix(&self, n: usize) -> String {
        format!(
            "amix=inputs={n}:duration={}:dropout_transition=0:normalize=0",
            self.duration.as_str()
        )
    }
}

/// Channel gains for a balance value.
fn balance(pan: f64) -> (f64, f64) {
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

impl StageOps for MixParams {
    fn capability(&self) -> Capability {
        Capability::Mix
    }

    fn arity(&self) -> Arity {
        Arity::at_least(2, StreamShape::NONE)
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let invalid = |msg: String| Err(cf_core::Error::invalid("mix", msg));
        if self.tracks.len() > inputs.len() {
            return invalid(format!(
                "{} track settings for {} inputs",
                self.tracks.len(),
                inputs.len()
            ));
        }
        for (i, track) in self.tracks.iter().enumerate() {
            if !(-60.0..=24.0).contains(&track.gain_db) {
                return invalid(format!("track {i} gain {} dB is outside [-60, 24]", track.gain_db));
            }
            if !(-1.0..=1.0).contains(&track.pan) {
                return invalid(format!("track {i} pan {} is outside [-1, 1]", track.pan));
            }
            if !(track.delay >= 0.0) {
                return invalid(format!("track {i} delay must be non-negative"));
            }
        }

        for (i, d) in inputs.iter().enumerate() {
            if d.audio_streams.is_empty() && self.carry_video != Some(i) {
                return Err(cf_core::Error::unsupported(format!(
                    "mix input {i} carries no audio"
                )));
            }
        }
        let audio = self.audio_inputs(inputs);
        if audio.is_empty() {
            return Err(cf_core::Error::unsupported("mix inputs carry no audio"));
        }

        if let Some(carry) = self.carry_video {
            match inputs.get(carry) {
                Some(d) if !d.video_streams.is_empty() => {}
                Some(_) => return invalid(format!("carry_video input {carry} has no video")),
                None => return invalid(format!("carry_video index {carry} is out of range")),
            }
        }

        if let Some(duck) = &self.ducking {
            if !audio.contains(&duck.foreground) {
                return invalid(format!(
                    "ducking foreground {} is not an audio input",
                    duck.foreground
                ));
            }
            if audio.len() < 2 {
                return invalid("ducking needs at least one background track".into());
            }
            if !(-60.0..=0.0).contains(&duck.threshold_db) {
                return invalid(format!("ducking threshold {} dB is outside [-60, 0]", duck.threshold_db));
            }
            if !(1.0..=20.0).contains(&duck.ratio) {
                return invalid(format!("ducking ratio {} is outside [1, 20]", duck.ratio));
            }
            if !(0.01..=2000.0).contains(&duck.attack_ms) {
                return invalid(format!("ducking attack {} ms is outside [0.01, 2000]", duck.attack_ms));
            }
            if !(0.01..=9000.0).contains(&duck.release_ms) {
                return invalid(format!("ducking release {} ms is outside [0.01, 9000]", duck.release_ms));
            }
            if !(1.0..=64.0).contains(&duck.makeup) {
                return invalid(format!("ducking makeup {} is outside [1, 64]", duck.makeup));
            }
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let audio = self.audio_inputs(inputs);
        let lengths: Vec<f64> = audio
            .iter()
            .map(|&i| inputs[i].duration_seconds + self.track(i).delay)
            .collect();
        let duration = match self.duration {
            MixDuration::Longest => lengths.iter().copied().fold(0.0, f64::max),
            MixDuration::Shortest => lengths.iter().copied().fold(f64::INFINITY, f64::min),
            MixDuration::First => lengths.first().copied().unwrap_or(0.0),
        };

        let mut out = MediaDescriptor::new("", duration);
        if let Some(first) = audio.first().and_then(|&i| inputs[i].primary_audio()) {
            let mut stream = AudioStream::new(first.codec.clone(), MIX_RATE, 2);
            stream.channel_layout = Some("stereo".into());
            out = out.with_audio(stream);
        }
        if let Some(carried) = self.carry_video.and_then(|i| inputs.get(i)) {
            out.video_streams = carried.video_streams.clone();
            out.path = carried.path.clone();
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let mut fragment = GraphFragment::new();

        // Per-track gain, balance and delay, normalized to stereo.
        let mut tracks: Vec<(usize, Pad)> = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            let Some(pad) = input.streams.audio.clone() else {
                continue;
            };
            let track = self.track(i);
            let channels = input.descriptor.primary_audio().map_or(2, |a| a.channels);
            let (left, right) = balance(track.pan);

            let mut filters = vec![format!("aresample={MIX_RATE}")];
            if track.gain_db != 0.0 {
                filters.push(format!("volume={}dB", num(track.gain_db)));
            }
            filters.push(match channels {
                1 => format!("pan=stereo|c0={}*c0|c1={}*c0", num(left), num(right)),
                2 => format!("pan=stereo|c0={}*c0|c1={}*c1", num(left), num(right)),
                _ => format!(
                    "aformat=channel_layouts=stereo,pan=stereo|c0={}*c0|c1={}*c1",
                    num(left),
                    num(right)
                ),
            });
            if track.delay > 0.0 {
                filters.push(format!("adelay=delays={}:all=1", (track.delay * 1000.0).round() as u64));
            }
            let out = fragment.filter(cx, pad, StreamKind::Audio, filters.join(","));
            tracks.push((i, out));
        }

        let Some(&(first_index, _)) = tracks.first() else {
            return Err(cf_core::Error::unsupported("mix inputs carry no audio"));
        };

        let mixed = match &self.ducking {
            None => {
                let pads: Vec<Pad> = tracks.iter().map(|(_, p)| p.clone()).collect();
                let out = cx.label(StreamKind::Audio);
                fragment.chain(pads, self.amix(tracks.len()), vec![out.clone()]);
                Pad::Label(out)
            }
            Some(duck) => {
                let Some((_, fg)) = tracks.iter().find(|(i, _)| *i == duck.foreground).cloned() else {
                    return Err(cf_core::Error::invalid("mix", "ducking foreground carries no audio"));
                };
                let background: Vec<Pad> = tracks
                    .iter()
                    .filter(|(i, _)| *i != duck.foreground)
                    .map(|(_, p)| p.clone())
                    .collect();

                let key = cx.label(StreamKind::Audio);
                let voice = cx.label(StreamKind::Audio);
                fragment.chain(vec![fg], "asplit=2", vec![voice.clone(), key.clone()]);

                let bed = match background.as_slice() {
                    [] => return Err(cf_core::Error::invalid("mix", "ducking needs a background track")),
                    [single] => single.clone(),
                    many => {
                        let out = cx.label(StreamKind::Audio);
                        fragment.chain(many.to_vec(), self.amix(many.len()), vec![out.clone()]);
                        Pad::Label(out)
                    }
                };

                let ducked = cx.label(StreamKind::Audio);
                fragment.chain(
                    vec![bed, Pad::Label(key)],
                    format!(
                        "sidechaincompress=threshold={}:ratio={}:attack={}:release={}:makeup={}",
                        num(10f64.powf(duck.threshold_db / 20.0)),
                        num(duck.ratio),
                        num(duck.attack_ms),
                        num(duck.release_ms),
                        num(duck.makeup)
                    ),
                    vec![ducked.clone()],
                );

                // Keep the first declared track first so `duration=first` holds.
                let pair = if first_index == duck.foreground {
                    vec![Pad::Label(voice), Pad::Label(ducked)]
                } else {
                    vec![Pad::Label(ducked), Pad::Label(voice)]
                };
                let out = cx.label(StreamKind::Audio);
                fragment.chain(pair, self.amix(2), vec![out.clone()]);
                Pad::Label(out)
            }
        };

        let audio = if self.normalize {
            fragment.filter(cx, mixed, StreamKind::Audio, "dynaudnorm")
        } else {
            mixed
        };
        let video = self
            .carry_video
            .and_then(|i| inputs.get(i))
            .and_then(|input| input.streams.video.clone());

        fragment.output = Streams {
            video,
            audio: Some(audio),
        };
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::InputSpec;
    use crate::stage::fixtures;
    use cf_core::config::EncodingConfig;

    fn lower(params: &MixParams, sources: &[MediaDescriptor]) -> (GraphFragment, LowerContext) {
        let mut cx = LowerContext::new(EncodingConfig::default());
        let inputs: Vec<StageInput<'_>> = sources
            .iter()
            .enumerate()
            .map(|(i, d)| StageInput {
                streams: cx.add_input(InputSpec::file(format!("/media/{i}")), d.clone()),
                descriptor: d,
            })
            .collect();
        let fragment = params.lower(&mut cx, &inputs).unwrap();
        (fragment, cx)
    }

    #[test]
    fn plain_mix_applies_gain_and_pan() {
        let params = MixParams {
            tracks: vec![
                MixInput { gain_db: -6.0, pan: -0.5, delay: 0.0 },
                MixInput { gain_db: 0.0, pan: 0.0, delay: 1.5 },
            ],
            ..Default::default()
        };
        let sources = [fixtures::av(10.0), fixtures::audio(8.0)];
        params.validate(&sources).unwrap();
        let (fragment, _) = lower(&params, &sources);

        assert_eq!(
            fragment.chains[0].filters,
            "aresample=48000,volume=-6dB,pan=stereo|c0=1*c0|c1=0.5*c1"
        );
        assert_eq!(
            fragment.chains[1].filters,
            "aresample=48000,pan=stereo|c0=1*c0|c1=1*c0,adelay=delays=1500:all=1"
        );
        assert_eq!(
            fragment.chains[2].filters,
            "amix=inputs=2:duration=longest:dropout_transition=0:normalize=0"
        );
        assert!(fragment.output.video.is_none());
    }

    #[test]
    fn ducking_keys_the_background_on_the_foreground() {
        let params = MixParams {
            ducking: Some(Ducking {
                foreground: 1,
                threshold_db: -20.0,
                ratio: 4.0,
                attack_ms: 5.0,
                release_ms: 250.0,
                makeup: 1.0,
            }),
            normalize: true,
            carry_video: Some(0),
            ..Default::default()
        };
        let sources = [fixtures::av(30.0), fixtures::audio(12.0)];
        params.validate(&sources).unwrap();
        let (fragment, _) = lower(&params, &sources);

        let filters: Vec<&str> = fragment.chains.iter().map(|c| c.filters.as_str()).collect();
        assert_eq!(filters[2], "asplit=2");
        assert_eq!(
            filters[3],
            "sidechaincompress=threshold=0.1:ratio=4:attack=5:release=250:makeup=1"
        );
        assert!(filters[4].starts_with("amix=inputs=2"));
        assert_eq!(filters[5], "dynaudnorm");
        // The carried video is still the untouched source stream.
        assert!(fragment.output.video.as_ref().unwrap().is_source());
    }

    #[test]
    fn inputs_without_audio_are_unsupported() {
        let params = MixParams::default();
        let err = params
            .validate(&[fixtures::video(5.0), fixtures::audio(5.0)])
            .unwrap_err();
        assert_eq!(err.kind(), cf_core::ErrorKind::UnsupportedCombination);

        let carried = MixParams {
            carry_video: Some(0),
            ..Default::default()
        };
        assert!(carried.validate(&[fixtures::video(5.0), fixtures::audio(5.0)]).is_ok());
    }

    #[test]
    fn parameter_ranges() {
        let sources = [fixtures::audio(5.0), fixtures::audio(5.0)];
        let loud = MixParams {
            tracks: vec![MixInput { gain_db: 30.0, ..Default::default() }],
            ..Default::default()
        };
        assert!(loud.validate(&sources).is_err());

        let wide = MixParams {
            tracks: vec![MixInput { pan: 1.5, ..Default::default() }],
            ..Default::default()
        };
        assert!(wide.validate(&sources).is_err());
    }

    #[test]
    fn duration_policy() {
        let sources = [fixtures::audio(10.0), fixtures::audio(4.0)];
        let mut params = MixParams {
            tracks: vec![MixInput::default(), MixInput { delay: 2.0, ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(params.describe_output(&sources).duration_seconds, 10.0);
        params.duration = MixDuration::Shortest;
        assert_eq!(params.describe_output(&sources).duration_seconds, 6.0);
        params.duration = MixDuration::First;
        assert_eq!(params.describe_output(&sources).duration_seconds, 10.0);
    }
}
