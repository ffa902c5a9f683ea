//! Turns a [`Pipeline`] into a [`Program`].
//!
//! Compilation probes the inputs, checks the slot graph, orders the stages,
//! predicts every slot's descriptor and validates each stage against it.
//! Stages that feed one output are merged into a single invocation; a slot
//! is written to the workspace only when a loudness pass, a scene split or
//! an analyzer needs it as a file.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cf_core::config::EncodingConfig;
use cf_probe::{MediaDescriptor, Prober, StreamShape};

use crate::codecs::{
    codec_family, container_accepts, container_of, default_audio_encoder, default_video_encoder,
    is_audio_container, is_lossless_audio, parse_bitrate,
};
use crate::graph::{AudioEncode, LowerContext, Pad, StreamKind, Streams, VideoEncode};
use crate::pipeline::Pipeline;
use crate::program::{
    AnalysisPlan, ArtifactKind, Expectations, InputSpec, Invocation, OutputStream, Program,
    ProgramOutput, RenderMode, SceneSplitPlan, Step, TemporaryArtifact,
};
use crate::stage::{measurement_var, LoudnessParams, Passes, SceneSplitParams, Stage, StageInput};

/// Directory artifact scene segments are written to.
const SCENES_DIR: &str = "scenes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Input(usize),
    Node(usize),
}

/// Who produces and who reads each slot.
struct Slots<'p> {
    producers: BTreeMap<&'p str, Producer>,
    /// Stages that transform the slot. At most one per slot.
    consumers: BTreeMap<&'p str, usize>,
    /// Analyze stages reading the slot.
    taps: BTreeMap<&'p str, Vec<usize>>,
    output: Option<&'p str>,
}

/// Compiles pipelines against a prober and the encoder defaults.
pub struct Compiler {
    prober: Arc<dyn Prober>,
    encoding: EncodingConfig,
}

impl Compiler {
    pub fn new(prober: Arc<dyn Prober>, encoding: EncodingConfig) -> Self {
        Self { prober, encoding }
    }

    /// Compile `pipeline`. Spawns nothing except the prober.
    ///
    /// Compiling the same pipeline against unchanged inputs yields an equal
    /// program.
    pub fn compile(&self, pipeline: &Pipeline) -> cf_core::Result<Program> {
        let slots = check_structure(pipeline)?;
        let order = topological_order(pipeline, &slots)?;
        let sources = self.probe_inputs(pipeline)?;
        let descriptors = estimate(pipeline, &order, &sources)?;

        let mut builder = Builder {
            pipeline,
            slots: &slots,
            descriptors: &descriptors,
            encoding: &self.encoding,
            files: BTreeMap::new(),
            encoded: BTreeMap::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
        };
        for (binding, (path, _)) in pipeline.inputs.iter().zip(&sources) {
            builder.files.insert(binding.slot.clone(), path.clone());
        }
        let program = builder.build(&order)?;

        tracing::debug!(
            steps = program.steps.len(),
            copy_eligible = program.copy_eligible,
            "pipeline compiled"
        );
        Ok(program)
    }

    /// Probe every input and resolve its absolute path.
    fn probe_inputs(&self, pipeline: &Pipeline) -> cf_core::Result<Vec<(String, MediaDescriptor)>> {
        pipeline
            .inputs
            .iter()
            .map(|binding| {
                let descriptor = self.prober.probe(&binding.path)?;
                let path = std::fs::canonicalize(&binding.path)
                    .or_else(|_| std::path::absolute(&binding.path))
                    .unwrap_or_else(|_| binding.path.clone());
                tracing::debug!(
                    slot = %binding.slot,
                    path = %path.display(),
                    duration = descriptor.duration_seconds,
                    shape = %descriptor.shape(),
                    "input probed"
                );
                Ok((path.display().to_string(), descriptor))
            })
            .collect()
    }
}

fn incompatible(msg: String) -> cf_core::Error {
    cf_core::Error::incompatible(msg)
}

/// Slot rules: unique names, defined producers, one transforming consumer
/// per slot, no dangling intermediates, a terminal output.
fn check_structure(pipeline: &Pipeline) -> cf_core::Result<Slots<'_>> {
    let label = |k: usize| pipeline.stages[k].label(k);
    let mut producers: BTreeMap<&str, Producer> = BTreeMap::new();

    for (i, binding) in pipeline.inputs.iter().enumerate() {
        if binding.slot.is_empty() {
            return Err(incompatible(format!("input {i} has an empty slot name")));
        }
        if producers.insert(binding.slot.as_str(), Producer::Input(i)).is_some() {
            return Err(incompatible(format!("slot {:?} is defined twice", binding.slot)));
        }
    }

    for (k, node) in pipeline.stages.iter().enumerate() {
        match (&node.stage, &node.output) {
            (Stage::Analyze(_), Some(_)) => {
                return Err(incompatible(format!("{} produces metadata, not a slot", label(k))));
            }
            (Stage::Analyze(_), None) => {}
            (_, None) => return Err(incompatible(format!("{} has no output slot", label(k)))),
            (_, Some(out)) => {
                if producers.insert(out.as_str(), Producer::Node(k)).is_some() {
                    return Err(incompatible(format!("slot {out:?} is defined twice")));
                }
            }
        }
    }

    let mut consumers: BTreeMap<&str, usize> = BTreeMap::new();
    let mut taps: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (k, node) in pipeline.stages.iter().enumerate() {
        for input in &node.inputs {
            if !producers.contains_key(input.as_str()) {
                return Err(incompatible(format!("{} reads undefined slot {input:?}", label(k))));
            }
            if matches!(node.stage, Stage::Analyze(_)) {
                taps.entry(input.as_str()).or_default().push(k);
            } else if let Some(&other) = consumers.get(input.as_str()) {
                if other != k {
                    return Err(incompatible(format!(
                        "slot {input:?} is consumed by both {} and {}",
                        label(other),
                        label(k)
                    )));
                }
                return Err(incompatible(format!("{} reads slot {input:?} twice", label(k))));
            } else {
                consumers.insert(input.as_str(), k);
            }
        }
    }

    let output = pipeline.output.as_ref().map(|o| o.slot.as_str());
    if let Some(out) = output {
        if !producers.contains_key(out) {
            return Err(incompatible(format!("output slot {out:?} is never produced")));
        }
        if let Some(&k) = consumers.get(out) {
            return Err(incompatible(format!(
                "output slot {out:?} feeds {}; the output must be terminal",
                label(k)
            )));
        }
    }

    for (&slot, &producer) in &producers {
        let is_output = output == Some(slot);
        match producer {
            Producer::Input(_) if !is_output && !consumers.contains_key(slot) && !taps.contains_key(slot) => {
                return Err(incompatible(format!("input slot {slot:?} is never used")));
            }
            Producer::Node(k) if !is_output && !consumers.contains_key(slot) => {
                return Err(incompatible(format!(
                    "slot {slot:?} produced by {} is never consumed",
                    label(k)
                )));
            }
            _ => {}
        }
    }

    for (k, node) in pipeline.stages.iter().enumerate() {
        if let Stage::SceneSplit(_) = node.stage {
            let slot = node.output.as_deref();
            if slot != output {
                return Err(incompatible(format!(
                    "{} writes a set of files and must produce the pipeline output",
                    label(k)
                )));
            }
            if let Some(tap) = slot.and_then(|s| taps.get(s)).and_then(|t| t.first()) {
                return Err(incompatible(format!(
                    "{} cannot analyze the scene files of {}",
                    label(*tap),
                    label(k)
                )));
            }
        }
    }

    if pipeline.stages.is_empty() && output.is_none() {
        return Err(incompatible("pipeline has no stages and no output".into()));
    }

    Ok(Slots {
        producers,
        consumers,
        taps,
        output,
    })
}

/// Kahn's algorithm over stream dependencies, ties broken by declaration
/// order.
fn topological_order(pipeline: &Pipeline, slots: &Slots<'_>) -> cf_core::Result<Vec<usize>> {
    let n = pipeline.stages.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (k, node) in pipeline.stages.iter().enumerate() {
        for input in &node.inputs {
            if let Some(&Producer::Node(p)) = slots.producers.get(input.as_str()) {
                indegree[k] += 1;
                dependents[p].push(k);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&k| indegree[k] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(k) = ready.pop_first() {
        order.push(k);
        for &d in &dependents[k] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() < n {
        let stuck: Vec<String> = (0..n)
            .filter(|k| !order.contains(k))
            .map(|k| pipeline.stages[k].label(k))
            .collect();
        return Err(incompatible(format!("stages form a cycle: {}", stuck.join(", "))));
    }
    Ok(order)
}

/// Check arity and parameters in order, predicting every slot's descriptor.
fn estimate(
    pipeline: &Pipeline,
    order: &[usize],
    sources: &[(String, MediaDescriptor)],
) -> cf_core::Result<BTreeMap<String, MediaDescriptor>> {
    let mut descriptors: BTreeMap<String, MediaDescriptor> = pipeline
        .inputs
        .iter()
        .zip(sources)
        .map(|(b, (_, d))| (b.slot.clone(), d.clone()))
        .collect();

    for &k in order {
        let node = &pipeline.stages[k];
        let label = node.label(k);
        let inputs: Vec<MediaDescriptor> = node
            .inputs
            .iter()
            .map(|slot| {
                descriptors
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| cf_core::Error::Internal(format!("slot {slot:?} has no descriptor")))
            })
            .collect::<cf_core::Result<_>>()?;
        let shapes: Vec<StreamShape> = inputs.iter().map(MediaDescriptor::shape).collect();

        let ops = node.stage.ops();
        ops.arity().check(&label, &shapes)?;
        ops.validate(&inputs)?;
        if let Some(out) = &node.output {
            let predicted = ops.describe_output(&inputs);
            tracing::trace!(stage = %label, slot = %out, duration = predicted.duration_seconds, "slot estimated");
            descriptors.insert(out.clone(), predicted);
        }
    }
    Ok(descriptors)
}

struct Built {
    invocation: Invocation,
    measures: Vec<Step>,
    video_cap: Option<u64>,
    audio_cap: Option<u64>,
}

struct Builder<'a> {
    pipeline: &'a Pipeline,
    slots: &'a Slots<'a>,
    descriptors: &'a BTreeMap<String, MediaDescriptor>,
    encoding: &'a EncodingConfig,
    /// Slots available as files: pipeline inputs and materialized slots.
    files: BTreeMap<String, String>,
    /// Streams of materialized slots that went through an encoder.
    encoded: BTreeMap<String, StreamShape>,
    steps: Vec<Step>,
    artifacts: Vec<TemporaryArtifact>,
}

impl<'a> Builder<'a> {
    fn build(mut self, order: &[usize]) -> cf_core::Result<Program> {
        let pipeline = self.pipeline;
        let slots = self.slots;
        let materialize = self.materialized_slots();

        for binding in &pipeline.inputs {
            self.push_taps(&binding.slot)?;
        }

        for &k in order {
            let node = &pipeline.stages[k];
            let Some(out) = node.output.as_deref() else {
                continue;
            };
            if !materialize.contains(out) {
                continue;
            }
            let name = format!("stage_{k}.mkv");
            let path = format!("{{workspace}}/{name}");
            let built = self.invocation(out, node.label(k), path.clone(), "mkv", true)?;
            let mut encoded = StreamShape::default();
            for stream in built.invocation.streams.iter().filter(|s| !s.copy_eligible) {
                match stream.kind {
                    StreamKind::Video => encoded.video = true,
                    StreamKind::Audio => encoded.audio = true,
                }
            }
            self.encoded.insert(out.to_string(), encoded);
            self.steps.extend(built.measures);
            self.steps.push(Step::Encode(built.invocation));
            self.artifacts.push(TemporaryArtifact {
                name,
                kind: ArtifactKind::File,
                contents: None,
            });
            self.files.insert(out.to_string(), path);
            self.push_taps(out)?;
        }

        let mut expected = Expectations::default();
        let (output, output_step) = match &pipeline.output {
            None => (ProgramOutput::None, None),
            Some(binding) => {
                let producer = slots.producers.get(binding.slot.as_str()).copied();
                let split = match producer {
                    Some(Producer::Node(k)) => match &pipeline.stages[k].stage {
                        Stage::SceneSplit(params) => Some((k, params)),
                        _ => None,
                    },
                    _ => None,
                };

                if let Some((k, params)) = split {
                    let plan = self.split_plan(k, params)?;
                    self.artifacts.push(TemporaryArtifact {
                        name: SCENES_DIR.to_string(),
                        kind: ArtifactKind::Directory,
                        contents: None,
                    });
                    self.steps.push(Step::SplitScenes(plan));
                    (
                        ProgramOutput::Directory {
                            artifact: SCENES_DIR.to_string(),
                            destination: binding.path.clone(),
                        },
                        Some(self.steps.len() - 1),
                    )
                } else {
                    let ext = container_of(&binding.path);
                    let name = format!("final.{ext}");
                    let label = match producer {
                        Some(Producer::Node(k)) => pipeline.stages[k].label(k),
                        _ => "remux".to_string(),
                    };
                    let built = self.invocation(&binding.slot, label, format!("{{workspace}}/{name}"), &ext, false)?;
                    self.steps.extend(built.measures);
                    self.steps.push(Step::Encode(built.invocation));
                    let output_step = self.steps.len() - 1;

                    if let Some(d) = self.descriptors.get(&binding.slot) {
                        expected.duration = (d.duration_seconds > 0.0).then_some(d.duration_seconds);
                        expected.frame_interval = d.frame_interval();
                    }
                    expected.video_bitrate_cap = built.video_cap;
                    expected.audio_bitrate_cap = built.audio_cap;

                    self.files.insert(binding.slot.clone(), format!("{{workspace}}/{name}"));
                    self.push_taps(&binding.slot)?;
                    (
                        ProgramOutput::File {
                            artifact: name,
                            destination: binding.path.clone(),
                        },
                        Some(output_step),
                    )
                }
            }
        };

        let copy_eligible = self.steps.iter().any(|s| s.uses_copy(RenderMode::Copy));
        Ok(Program {
            steps: self.steps,
            artifacts: self.artifacts,
            output,
            output_step,
            copy_eligible,
            expected,
        })
    }

    /// Slots a multi-pass, discrete or tap stage needs as files.
    fn materialized_slots(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for node in &self.pipeline.stages {
            if node.stage.ops().passes() == Passes::Single {
                continue;
            }
            for input in &node.inputs {
                let produced = matches!(self.slots.producers.get(input.as_str()), Some(Producer::Node(_)));
                if produced && self.slots.output != Some(input.as_str()) {
                    set.insert(input.clone());
                }
            }
        }
        set
    }

    /// Analysis steps for every tap on `slot`, which must be file-backed.
    fn push_taps(&mut self, slot: &str) -> cf_core::Result<()> {
        let pipeline = self.pipeline;
        let Some(taps) = self.slots.taps.get(slot) else {
            return Ok(());
        };
        let source = self
            .files
            .get(slot)
            .cloned()
            .ok_or_else(|| cf_core::Error::Internal(format!("tapped slot {slot:?} is not a file")))?;
        for &k in taps {
            let node = &pipeline.stages[k];
            if let Stage::Analyze(params) = &node.stage {
                self.steps.push(Step::Analyze(AnalysisPlan {
                    label: node.label(k),
                    slot: slot.to_string(),
                    source: source.clone(),
                    analyzer: params.analyzer,
                    params: params.clone(),
                }));
            }
        }
        Ok(())
    }

    /// One invocation producing `slot` into `output`.
    fn invocation(
        &mut self,
        slot: &str,
        label: String,
        output: String,
        ext: &str,
        intermediate: bool,
    ) -> cf_core::Result<Built> {
        let mut cx = LowerContext::new(self.encoding.clone());
        let mut measures = Vec::new();
        let mut streams = match self.slots.producers.get(slot) {
            Some(&Producer::Node(k)) => self.lower_node(&mut cx, k, &mut measures)?,
            _ => self.lower_slot(&mut cx, slot, &mut measures)?,
        };
        if is_audio_container(ext) {
            streams.video = None;
        }

        let rendered = cx.render();
        let mut outputs = Vec::new();
        if let Some(pad) = &streams.video {
            outputs.push(OutputStream {
                kind: StreamKind::Video,
                map: rendered.map_arg(pad),
                copy_eligible: video_copy_eligible(&cx, pad, ext),
                encode: video_args(cx.video_target.as_ref(), self.encoding, ext, intermediate),
            });
        }
        if let Some(pad) = &streams.audio {
            outputs.push(OutputStream {
                kind: StreamKind::Audio,
                map: rendered.map_arg(pad),
                copy_eligible: audio_copy_eligible(&cx, pad, ext),
                encode: audio_args(cx.audio_target.as_ref(), self.encoding, ext, intermediate),
            });
        }
        if outputs.is_empty() {
            return Err(cf_core::Error::unsupported(format!(
                "slot {slot:?} has no stream a .{ext} file can hold"
            )));
        }

        self.artifacts.extend(cx.take_artifacts());
        Ok(Built {
            invocation: Invocation {
                label,
                inputs: rendered.inputs,
                filter_graph: rendered.chains,
                streams: outputs,
                output_options: Vec::new(),
                format: None,
                output,
            },
            measures,
            video_cap: cx.video_target.as_ref().and_then(|t| t.bitrate),
            audio_cap: cx.audio_target.as_ref().and_then(|t| t.bitrate),
        })
    }

    /// Streams of `slot`: a file input when it is file-backed, its
    /// producer's lowering otherwise.
    fn lower_slot(&self, cx: &mut LowerContext, slot: &str, measures: &mut Vec<Step>) -> cf_core::Result<Streams> {
        if let Some(path) = self.files.get(slot) {
            let descriptor = self
                .descriptors
                .get(slot)
                .cloned()
                .ok_or_else(|| cf_core::Error::Internal(format!("slot {slot:?} has no descriptor")))?;
            let encoded = self.encoded.get(slot).copied().unwrap_or_default();
            return Ok(cx.add_encoded_input(InputSpec::file(path.clone()), descriptor, encoded));
        }
        match self.slots.producers.get(slot) {
            Some(&Producer::Node(k)) => self.lower_node(cx, k, measures),
            _ => Err(cf_core::Error::Internal(format!("slot {slot:?} has no producer"))),
        }
    }

    fn lower_node(&self, cx: &mut LowerContext, k: usize, measures: &mut Vec<Step>) -> cf_core::Result<Streams> {
        let pipeline = self.pipeline;
        let descriptors = self.descriptors;
        let node = &pipeline.stages[k];

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for slot in &node.inputs {
            let streams = self.lower_slot(cx, slot, measures)?;
            let descriptor = descriptors
                .get(slot)
                .ok_or_else(|| cf_core::Error::Internal(format!("slot {slot:?} has no descriptor")))?;
            inputs.push(StageInput { streams, descriptor });
        }

        if let Stage::Loudness(params) = &node.stage {
            measures.push(self.measure_step(k, params, &node.inputs[0])?);
        }

        cx.set_node(k);
        let fragment = node.stage.ops().lower(cx, &inputs)?;
        cx.append(fragment.chains);
        Ok(fragment.output)
    }

    /// First loudness pass over the (file-backed) input slot.
    fn measure_step(&self, k: usize, params: &LoudnessParams, slot: &str) -> cf_core::Result<Step> {
        let path = self
            .files
            .get(slot)
            .ok_or_else(|| cf_core::Error::Internal(format!("loudness input {slot:?} is not a file")))?;
        let invocation = Invocation {
            label: format!("{} (measure)", self.pipeline.stages[k].label(k)),
            inputs: vec![InputSpec::file(path.clone())],
            filter_graph: vec![format!("[0:a:0]{}[m]", params.measure_filter())],
            streams: vec![OutputStream {
                kind: StreamKind::Audio,
                map: "[m]".to_string(),
                copy_eligible: false,
                encode: vec!["-c:a".to_string(), "pcm_s16le".to_string()],
            }],
            output_options: Vec::new(),
            format: Some("null".to_string()),
            output: "-".to_string(),
        };
        Ok(Step::MeasureLoudness {
            invocation,
            var: measurement_var(k),
        })
    }

    fn split_plan(&self, k: usize, params: &SceneSplitParams) -> cf_core::Result<SceneSplitPlan> {
        let node = &self.pipeline.stages[k];
        let slot = node
            .inputs
            .first()
            .ok_or_else(|| cf_core::Error::Internal("scene split without input".into()))?;
        let source = self
            .files
            .get(slot)
            .cloned()
            .ok_or_else(|| cf_core::Error::Internal(format!("scene split input {slot:?} is not a file")))?;
        let descriptor = self
            .descriptors
            .get(slot)
            .ok_or_else(|| cf_core::Error::Internal(format!("slot {slot:?} has no descriptor")))?;

        let extension = params.extension.clone().unwrap_or_else(|| {
            match self.pipeline.input_for(slot) {
                Some(binding) => container_of(&binding.path),
                None => "mp4".to_string(),
            }
        });
        let has_audio = !descriptor.audio_streams.is_empty() && !is_audio_container(&extension);
        let encoded = self.encoded.get(slot).copied().unwrap_or_default();

        Ok(SceneSplitPlan {
            label: node.label(k),
            source,
            threshold: params.threshold,
            min_scene_seconds: params.min_scene,
            expected_duration: descriptor.duration_seconds,
            directory: SCENES_DIR.to_string(),
            video_encode: video_args(None, self.encoding, &extension, false),
            audio_encode: if has_audio {
                audio_args(None, self.encoding, &extension, false)
            } else {
                Vec::new()
            },
            extension,
            has_audio,
            copy_eligible: !encoded.video && !(has_audio && encoded.audio),
        })
    }
}

fn video_copy_eligible(cx: &LowerContext, pad: &Pad, ext: &str) -> bool {
    let Some(src) = cx.source_of(pad).and_then(|d| d.primary_video()) else {
        return false;
    };
    if let Some(target) = &cx.video_target {
        let recodes = target.encoder.as_deref().is_some_and(|e| codec_family(e) != src.codec)
            || target.crf.is_some()
            || target.preset.is_some()
            || target.pixel_format.is_some();
        if recodes {
            return false;
        }
        if let (Some(cap), Some(rate)) = (target.bitrate, src.bitrate) {
            if rate > cap {
                return false;
            }
        }
    }
    container_accepts(ext, StreamKind::Video, &src.codec).unwrap_or(true)
}

fn audio_copy_eligible(cx: &LowerContext, pad: &Pad, ext: &str) -> bool {
    let Some(src) = cx.source_of(pad).and_then(|d| d.primary_audio()) else {
        return false;
    };
    if let Some(target) = &cx.audio_target {
        if target.encoder.as_deref().is_some_and(|e| codec_family(e) != src.codec) {
            return false;
        }
        if let (Some(cap), Some(rate)) = (target.bitrate, src.bitrate) {
            if rate > cap {
                return false;
            }
        }
    }
    container_accepts(ext, StreamKind::Audio, &src.codec).unwrap_or(true)
}

fn push(args: &mut Vec<String>, flag: &str, value: impl ToString) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

/// Encoder arguments for a video stream.
fn video_args(target: Option<&VideoEncode>, encoding: &EncodingConfig, ext: &str, intermediate: bool) -> Vec<String> {
    let default = VideoEncode::default();
    let target = target.unwrap_or(&default);
    let mut args = Vec::new();

    if intermediate && target.encoder.is_none() && target.bitrate.is_none() {
        // Lossless, fast intermediate.
        push(&mut args, "-c:v", "libx264");
        push(&mut args, "-qp", 0);
        push(&mut args, "-preset", "ultrafast");
        push(&mut args, "-pix_fmt", &encoding.pixel_format);
        return args;
    }

    let encoder = target
        .encoder
        .clone()
        .unwrap_or_else(|| default_video_encoder(ext, encoding).to_string());
    let family = codec_family(&encoder).to_string();
    let rate_controlled = matches!(family.as_str(), "h264" | "hevc" | "vp9" | "av1");
    push(&mut args, "-c:v", &encoder);

    if let Some(bitrate) = target.bitrate {
        push(&mut args, "-b:v", bitrate);
    }
    match target.crf {
        Some(crf) => push(&mut args, "-crf", crf),
        None if target.bitrate.is_none() && rate_controlled => {
            push(&mut args, "-crf", encoding.video_crf);
            if family == "vp9" {
                push(&mut args, "-b:v", 0);
            }
        }
        None => {}
    }
    let preset = target
        .preset
        .clone()
        .or_else(|| matches!(family.as_str(), "h264" | "hevc").then(|| encoding.video_preset.clone()));
    if let Some(preset) = preset {
        push(&mut args, "-preset", preset);
    }
    let pixel_format = target.pixel_format.as_deref().unwrap_or(&encoding.pixel_format);
    push(&mut args, "-pix_fmt", pixel_format);
    args
}

/// Encoder arguments for an audio stream.
fn audio_args(target: Option<&AudioEncode>, encoding: &EncodingConfig, ext: &str, intermediate: bool) -> Vec<String> {
    let default = AudioEncode::default();
    let target = target.unwrap_or(&default);
    let encoder = match &target.encoder {
        Some(e) => e.clone(),
        None if intermediate => "pcm_s16le".to_string(),
        None => default_audio_encoder(ext, encoding).to_string(),
    };
    let mut args = Vec::new();
    push(&mut args, "-c:a", &encoder);
    if !is_lossless_audio(&encoder) {
        if let Some(bitrate) = target.bitrate.or_else(|| parse_bitrate(&encoding.audio_bitrate)) {
            push(&mut args, "-b:a", bitrate);
        }
    }
    args
}
