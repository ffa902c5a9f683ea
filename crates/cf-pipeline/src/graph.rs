//! Filter-graph building blocks used while lowering stages.
//!
//! Stages never format input indices themselves. They work with [`Pad`]s;
//! an untouched input stream stays a [`Pad::Source`] until some filter
//! consumes it, which is exactly what makes it copy-eligible. The
//! [`LowerContext`] collects inputs, chains and encoder targets for one
//! invocation and renders them once lowering is complete.

use cf_core::config::EncodingConfig;
use cf_probe::{MediaDescriptor, StreamShape};
use serde::{Deserialize, Serialize};

use crate::program::{ArtifactKind, InputSpec, TemporaryArtifact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn letter(self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
        }
    }

    pub fn codec_flag(self) -> &'static str {
        match self {
            StreamKind::Video => "-c:v",
            StreamKind::Audio => "-c:a",
        }
    }
}

/// A stream flowing between stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pad {
    /// The first stream of `kind` of context input `input`, untouched.
    Source { input: usize, kind: StreamKind },
    /// The named output of a filter chain.
    Label(String),
}

impl Pad {
    pub fn is_source(&self) -> bool {
        matches!(self, Pad::Source { .. })
    }
}

/// The streams a slot carries at some point of lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Streams {
    pub video: Option<Pad>,
    pub audio: Option<Pad>,
}

impl Streams {
    /// Input index when every present pad is an untouched stream of the
    /// same input.
    pub fn single_source(&self) -> Option<usize> {
        let mut found: Option<usize> = None;
        for pad in [&self.video, &self.audio].into_iter().flatten() {
            match pad {
                Pad::Source { input, .. } if found.is_none() || found == Some(*input) => {
                    found = Some(*input);
                }
                _ => return None,
            }
        }
        found
    }
}

/// `[in]...filters...[out]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<Pad>,
    pub filters: String,
    pub outputs: Vec<String>,
}

/// What a stage contributes to an invocation: filter chains plus the
/// streams of its output slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphFragment {
    pub chains: Vec<FilterChain>,
    pub output: Streams,
}

impl GraphFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(&mut self, inputs: Vec<Pad>, filters: impl Into<String>, outputs: Vec<String>) {
        self.chains.push(FilterChain {
            inputs,
            filters: filters.into(),
            outputs,
        });
    }

    /// Run one pad through a single-input, single-output filter chain.
    pub fn filter(
        &mut self,
        cx: &mut LowerContext,
        pad: Pad,
        kind: StreamKind,
        filters: impl Into<String>,
    ) -> Pad {
        let out = cx.label(kind);
        self.chain(vec![pad], filters, vec![out.clone()]);
        Pad::Label(out)
    }
}

/// Video encoder target set by a transcode stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoEncode {
    pub encoder: Option<String>,
    pub bitrate: Option<u64>,
    pub crf: Option<u32>,
    pub preset: Option<String>,
    pub pixel_format: Option<String>,
}

/// Audio encoder target set by a transcode stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioEncode {
    pub encoder: Option<String>,
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone)]
struct InputEntry {
    spec: InputSpec,
    descriptor: MediaDescriptor,
    absorbed: bool,
    /// Streams an earlier invocation already re-encoded.
    encoded: StreamShape,
}

/// Invocation-wide state shared by the stages lowered into it.
#[derive(Debug, Clone)]
pub struct LowerContext {
    pub encoding: EncodingConfig,
    node: usize,
    next_label: usize,
    inputs: Vec<InputEntry>,
    chains: Vec<FilterChain>,
    artifacts: Vec<TemporaryArtifact>,
    pub video_target: Option<VideoEncode>,
    pub audio_target: Option<AudioEncode>,
}

impl LowerContext {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            encoding,
            node: 0,
            next_label: 0,
            inputs: Vec::new(),
            chains: Vec::new(),
            artifacts: Vec::new(),
            video_target: None,
            audio_target: None,
        }
    }

    /// Index of the pipeline stage currently being lowered.
    pub fn node(&self) -> usize {
        self.node
    }

    pub(crate) fn set_node(&mut self, node: usize) {
        self.node = node;
    }

    /// Fresh graph label such as `v3` or `a4`.
    pub fn label(&mut self, kind: StreamKind) -> String {
        let label = format!("{}{}", kind.letter(), self.next_label);
        self.next_label += 1;
        label
    }

    /// Register an input file and return its untouched streams.
    pub fn add_input(&mut self, spec: InputSpec, descriptor: MediaDescriptor) -> Streams {
        self.add_encoded_input(spec, descriptor, StreamShape::default())
    }

    /// Register an intermediate file whose `encoded` streams were produced
    /// by an encoder. Those streams never count as untouched sources.
    pub fn add_encoded_input(&mut self, spec: InputSpec, descriptor: MediaDescriptor, encoded: StreamShape) -> Streams {
        let index = self.inputs.len();
        let shape = descriptor.shape();
        self.inputs.push(InputEntry {
            spec,
            descriptor,
            absorbed: false,
            encoded,
        });
        Streams {
            video: shape.video.then_some(Pad::Source {
                input: index,
                kind: StreamKind::Video,
            }),
            audio: shape.audio.then_some(Pad::Source {
                input: index,
                kind: StreamKind::Audio,
            }),
        }
    }

    pub fn input_descriptor(&self, input: usize) -> Option<&MediaDescriptor> {
        self.inputs.get(input).map(|e| &e.descriptor)
    }

    /// Turn `[start, end)` of an untouched input into input seeking.
    /// Returns `false` when the streams are not a single untouched input
    /// or that input is already seeked.
    pub fn seek_input(&mut self, streams: &Streams, start: f64, end: Option<f64>) -> bool {
        let Some(index) = streams.single_source() else {
            return false;
        };
        let Some(entry) = self.inputs.get_mut(index) else {
            return false;
        };
        let spec = &mut entry.spec;
        if spec.seek.is_some() || spec.until.is_some() || spec.format.is_some() {
            return false;
        }
        spec.seek = (start > 0.0).then_some(start);
        spec.until = end;
        true
    }

    /// Replace untouched inputs by one concat-demuxer input reading a list
    /// artifact. Returns `None` when an input is not a plain file.
    pub fn concat_inputs(&mut self, inputs: &[usize], descriptor: MediaDescriptor) -> Option<Streams> {
        let mut list = String::from("ffconcat version 1.0\n");
        for &i in inputs {
            let entry = self.inputs.get(i)?;
            let spec = &entry.spec;
            if entry.absorbed || spec.seek.is_some() || spec.until.is_some() || spec.format.is_some() {
                return None;
            }
            list.push_str(&format!("file '{}'\n", spec.path.replace('\'', "'\\''")));
        }
        let mut encoded = StreamShape::default();
        for &i in inputs {
            if let Some(entry) = self.inputs.get_mut(i) {
                entry.absorbed = true;
                encoded.video |= entry.encoded.video;
                encoded.audio |= entry.encoded.audio;
            }
        }

        let name = format!("concat_{}.txt", self.node);
        self.artifacts.push(TemporaryArtifact {
            name: name.clone(),
            kind: ArtifactKind::File,
            contents: Some(list),
        });
        let spec = InputSpec {
            format: Some("concat".into()),
            options: vec!["-safe".into(), "0".into()],
            ..InputSpec::file(format!("{{workspace}}/{name}"))
        };
        Some(self.add_encoded_input(spec, descriptor, encoded))
    }

    pub fn push_artifact(&mut self, artifact: TemporaryArtifact) {
        self.artifacts.push(artifact);
    }

    pub(crate) fn append(&mut self, chains: Vec<FilterChain>) {
        self.chains.extend(chains);
    }

    /// Descriptor of the untouched input behind a pad. `None` for graph
    /// labels and for streams of an encoded intermediate.
    pub fn source_of(&self, pad: &Pad) -> Option<&MediaDescriptor> {
        let Pad::Source { input, kind } = pad else {
            return None;
        };
        let entry = self.inputs.get(*input)?;
        let encoded = match kind {
            StreamKind::Video => entry.encoded.video,
            StreamKind::Audio => entry.encoded.audio,
        };
        (!encoded).then_some(&entry.descriptor)
    }

    /// Compact the inputs (dropping those absorbed into concat lists) and
    /// render the filter chains against the final input numbering.
    pub(crate) fn render(&self) -> RenderedGraph {
        let mut mapping = Vec::with_capacity(self.inputs.len());
        let mut inputs = Vec::new();
        for entry in &self.inputs {
            if entry.absorbed {
                mapping.push(None);
            } else {
                mapping.push(Some(inputs.len()));
                inputs.push(entry.spec.clone());
            }
        }

        let chains = self
            .chains
            .iter()
            .map(|chain| {
                let mut s = String::new();
                for pad in &chain.inputs {
                    s.push('[');
                    s.push_str(&pad_spec(pad, &mapping));
                    s.push(']');
                }
                s.push_str(&chain.filters);
                for out in &chain.outputs {
                    s.push('[');
                    s.push_str(out);
                    s.push(']');
                }
                s
            })
            .collect();

        RenderedGraph {
            inputs,
            chains,
            mapping,
        }
    }

    pub(crate) fn take_artifacts(&mut self) -> Vec<TemporaryArtifact> {
        std::mem::take(&mut self.artifacts)
    }
}

pub(crate) struct RenderedGraph {
    pub inputs: Vec<InputSpec>,
    pub chains: Vec<String>,
    mapping: Vec<Option<usize>>,
}

impl RenderedGraph {
    /// `-map` argument for a pad.
    pub fn map_arg(&self, pad: &Pad) -> String {
        match pad {
            Pad::Source { .. } => pad_spec(pad, &self.mapping),
            Pad::Label(label) => format!("[{label}]"),
        }
    }
}

fn pad_spec(pad: &Pad, mapping: &[Option<usize>]) -> String {
    match pad {
        Pad::Source { input, kind } => {
            let index = mapping.get(*input).copied().flatten().unwrap_or(*input);
            format!("{index}:{}:0", kind.letter())
        }
        Pad::Label(label) => label.clone(),
    }
}
