//! Text and image overlays with time windows.
//!
//! Elements are composited bottom-up: ascending layer, and within a layer in
//! declaration order, so a later declaration is drawn on top of an earlier
//! one whose window overlaps it.

use std::sync::LazyLock;

use cf_probe::{MediaDescriptor, StreamShape};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{num, passthrough, Arity, Capability, StageInput, StageOps, TimeSpec};
use crate::graph::{GraphFragment, LowerContext, Pad, StreamKind, Streams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedPosition {
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    TopCenter,
    BottomCenter,
}

/// Where an element is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Anchor {
    Named(NamedPosition),
    At { x: i32, y: i32 },
}

impl Default for Anchor {
    fn default() -> Self {
        Anchor::Named(NamedPosition::Center)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverlayKind {
    Text {
        text: String,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_color")]
        color: String,
        /// Background box color, e.g. `black@0.5`.
        #[serde(default)]
        box_color: Option<String>,
        #[serde(default)]
        font_file: Option<String>,
    },
    Image {
        /// Index into the stage's inputs (1 or greater; input 0 is the base).
        input: usize,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default = "default_opacity")]
        opacity: f64,
    },
}

/// A color name, `#RRGGBB[AA]` or `0xRRGGBB[AA]`, optionally `@alpha`.
static COLOR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z]+|(?:#|0x)[0-9A-Fa-f]{6}(?:[0-9A-Fa-f]{2})?)(?:@(?:\d+(?:\.\d+)?|0x[0-9A-Fa-f]{2}))?$",
    )
    .ok()
});

fn is_color(value: &str) -> bool {
    COLOR.as_ref().is_some_and(|re| re.is_match(value))
}

fn default_font_size() -> u32 {
    48
}

fn default_color() -> String {
    "white".into()
}

fn default_opacity() -> f64 {
    1.0
}

fn default_margin() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayElement {
    #[serde(flatten)]
    pub kind: OverlayKind,
    #[serde(default)]
    pub anchor: Anchor,
    #[serde(default = "default_margin")]
    pub margin: u32,
    /// Window start; defaults to the beginning.
    #[serde(default)]
    pub start: Option<TimeSpec>,
    /// Window end (exclusive); defaults to the end of the base.
    #[serde(default)]
    pub end: Option<TimeSpec>,
    #[serde(default)]
    pub layer: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayParams {
    pub elements: Vec<OverlayElement>,
}

/// Which coordinate variables an expression refers to.
enum Frame {
    /// drawtext: `w`/`h` frame, `text_w`/`text_h` element.
    Text,
    /// overlay: `main_w`/`main_h` frame, `overlay_w`/`overlay_h` element.
    Overlay,
}

impl Anchor {
    fn coords(&self, margin: u32, frame: Frame) -> (String, String) {
        let (fw, fh, ew, eh) = match frame {
            Frame::Text => ("w", "h", "text_w", "text_h"),
            Frame::Overlay => ("main_w", "main_h", "overlay_w", "overlay_h"),
        };
        let m = margin;
        let center_x = format!("({fw}-{ew})/2");
        let center_y = format!("({fh}-{eh})/2");
        let right = format!("{fw}-{ew}-{m}");
        let bottom = format!("{fh}-{eh}-{m}");
        match self {
            Anchor::At { x, y } => (x.to_string(), y.to_string()),
            Anchor::Named(pos) => match pos {
                NamedPosition::Center => (center_x, center_y),
                NamedPosition::TopLeft => (m.to_string(), m.to_string()),
                NamedPosition::TopRight => (right, m.to_string()),
                NamedPosition::BottomLeft => (m.to_string(), bottom),
                NamedPosition::BottomRight => (right, bottom),
                NamedPosition::TopCenter => (center_x, m.to_string()),
                NamedPosition::BottomCenter => (center_x, bottom),
            },
        }
    }
}

/// Escape text for a single-quoted drawtext value inside a filter graph.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\\\\\"),
            '\'' => out.push_str("'\\\\\\''"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

impl OverlayElement {
    /// `[start, end)` in seconds, clamped to the base duration.
    fn window(&self, base: &MediaDescriptor) -> cf_core::Result<(f64, f64)> {
        let invalid = |msg: String| cf_core::Error::invalid("overlay", msg);
        let fps = base.primary_video().and_then(|v| v.frame_rate);
        let total = base.duration_seconds;
        let start = match &self.start {
            Some(t) => t.resolve(fps).map_err(invalid)?,
            None => 0.0,
        };
        let end = match &self.end {
            Some(t) => t.resolve(fps).map_err(invalid)?,
            None => total,
        };
        let end = if total > 0.0 { end.min(total) } else { end };
        if end <= start {
            return Err(invalid(format!(
                "window [{start:.3}, {end:.3}) is empty"
            )));
        }
        Ok((start, end))
    }

    fn enable(&self, base: &MediaDescriptor) -> cf_core::Result<String> {
        let (start, end) = self.window(base)?;
        Ok(format!("enable='gte(t,{})*lt(t,{})'", num(start), num(end)))
    }
}

impl OverlayParams {
    /// Element indices in compositing order.
    fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.elements.len()).collect();
        // Stable: declaration order survives within a layer.
        order.sort_by_key(|&i| self.elements[i].layer);
        order
    }
}

impl StageOps for OverlayParams {
    fn capability(&self) -> Capability {
        Capability::Overlay
    }

    fn arity(&self) -> Arity {
        Arity {
            min: 1,
            max: None,
            first: StreamShape::VIDEO,
            rest: StreamShape::VIDEO,
        }
    }

    fn validate(&self, inputs: &[MediaDescriptor]) -> cf_core::Result<()> {
        let invalid = |msg: String| Err(cf_core::Error::invalid("overlay", msg));
        let base = passthrough(inputs);
        if self.elements.is_empty() {
            return invalid("overlay has no elements".into());
        }

        let mut used = vec![false; inputs.len()];
        for (i, element) in self.elements.iter().enumerate() {
            element.window(&base)?;
            match &element.kind {
                OverlayKind::Text {
                    text,
                    font_size,
                    color,
                    box_color,
                    ..
                } => {
                    if text.trim().is_empty() {
                        return invalid(format!("element {i}: text is empty"));
                    }
                    if let Some(bad) = std::iter::once(color).chain(box_color).find(|c| !is_color(c)) {
                        return invalid(format!("element {i}: {bad:?} is not a color"));
                    }
                    if *font_size == 0 || *font_size > 1000 {
                        return invalid(format!("element {i}: font size {font_size} is out of range"));
                    }
                }
                OverlayKind::Image { input, opacity, width, height } => {
                    if *input == 0 || *input >= inputs.len() {
                        return invalid(format!(
                            "element {i}: image input {input} does not name an overlay input"
                        ));
                    }
                    if used[*input] {
                        return invalid(format!("element {i}: image input {input} is used twice"));
                    }
                    used[*input] = true;
                    if !(0.0..=1.0).contains(opacity) {
                        return invalid(format!("element {i}: opacity {opacity} is outside 0..1"));
                    }
                    if width == &Some(0) || height == &Some(0) {
                        return invalid(format!("element {i}: image size must be positive"));
                    }
                }
            }
        }

        if let Some(unused) = (1..inputs.len()).find(|&i| !used[i]) {
            return invalid(format!("overlay input {unused} is not used by any element"));
        }
        Ok(())
    }

    fn describe_output(&self, inputs: &[MediaDescriptor]) -> MediaDescriptor {
        let mut out = passthrough(inputs);
        for v in &mut out.video_streams {
            v.bitrate = None;
        }
        out
    }

    fn lower(&self, cx: &mut LowerContext, inputs: &[StageInput<'_>]) -> cf_core::Result<GraphFragment> {
        let base = &inputs[0];
        let mut fragment = GraphFragment::new();
        let Some(mut current) = base.streams.video.clone() else {
            return Err(cf_core::Error::incompatible("overlay base has no video stream"));
        };

        for i in self.order() {
            let element = &self.elements[i];
            let enable = element.enable(base.descriptor)?;
            current = match &element.kind {
                OverlayKind::Text {
                    text,
                    font_size,
                    color,
                    box_color,
                    font_file,
                } => {
                    let (x, y) = element.anchor.coords(element.margin, Frame::Text);
                    let mut expr = String::from("drawtext=");
                    if let Some(font) = font_file {
                        expr.push_str(&format!("fontfile='{}':", escape_text(font)));
                    }
                    expr.push_str(&format!(
                        "text='{}':fontsize={font_size}:fontcolor={color}:x={x}:y={y}",
                        escape_text(text)
                    ));
                    if let Some(box_color) = box_color {
                        expr.push_str(&format!(":box=1:boxcolor={box_color}:boxborderw=8"));
                    }
                    expr.push(':');
                    expr.push_str(&enable);
                    fragment.filter(cx, current, StreamKind::Video, expr)
                }
                OverlayKind::Image {
                    input,
                    width,
                    height,
                    opacity,
                } => {
                    let Some(image) = inputs.get(*input).and_then(|inp| inp.streams.video.clone()) else {
                        return Err(cf_core::Error::incompatible(format!(
                            "overlay image input {input} has no video stream"
                        )));
                    };
                    let mut prep = Vec::new();
                    match (width, height) {
                        (Some(w), Some(h)) => prep.push(format!("scale={w}:{h}")),
                        (Some(w), None) => prep.push(format!("scale={w}:-1")),
                        (None, Some(h)) => prep.push(format!("scale=-1:{h}")),
                        (None, None) => {}
                    }
                    prep.push("format=rgba".to_string());
                    if *opacity < 1.0 {
                        prep.push(format!("colorchannelmixer=aa={}", num(*opacity)));
                    }
                    let image = fragment.filter(cx, image, StreamKind::Video, prep.join(","));

                    let (x, y) = element.anchor.coords(element.margin, Frame::Overlay);
                    let out = cx.label(StreamKind::Video);
                    fragment.chain(
                        vec![current, image],
                        format!("overlay=x={x}:y={y}:{enable}"),
                        vec![out.clone()],
                    );
                    Pad::Label(out)
                }
            };
        }

        fragment.output = Streams {
            video: Some(current),
            audio: base.streams.audio.clone(),
        };
        Ok(fragment)
    }
}
