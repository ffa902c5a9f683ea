//! The declarative edit request: input bindings, stages wired by named
//! slots, and one output binding.
//!
//! A [`Pipeline`] is plain data. It is what the CLI reads from JSON and what
//! the agent transport submits. Nothing here touches the filesystem; the
//! [`Compiler`](crate::Compiler) does the probing and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Binds a logical slot name to a concrete input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub slot: String,
    pub path: PathBuf,
}

/// Where the final slot is written.
///
/// For a scene-split output `path` names a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub slot: String,
    pub path: PathBuf,
}

/// One stage plus its slot wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageNode {
    /// Optional human-readable label used in logs and diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Slots this stage consumes, in the order the stage expects them.
    pub inputs: Vec<String>,
    /// Slot this stage produces. Analyze stages produce metadata, not a
    /// slot, and leave this empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(flatten)]
    pub stage: Stage,
}

impl StageNode {
    pub fn new(stage: Stage, inputs: &[&str], output: Option<&str>) -> Self {
        Self {
            name: None,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.map(str::to_string),
            stage,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label for logs: the explicit name, or `<kind>#<index>`.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}#{index}", self.stage.kind()),
        }
    }
}

/// An ordered, not yet validated graph of stages plus file bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub inputs: Vec<InputBinding>,
    #[serde(default)]
    pub stages: Vec<StageNode>,
    /// Analysis-only pipelines have no output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputBinding>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a pipeline from JSON.
    pub fn from_json(json: &str) -> cf_core::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| cf_core::Error::Validation(format!("pipeline parse error: {e}")))
    }

    /// Load a pipeline from a JSON file.
    pub fn load(path: &Path) -> cf_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn input(mut self, slot: &str, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(InputBinding {
            slot: slot.to_string(),
            path: path.into(),
        });
        self
    }

    pub fn stage(mut self, node: StageNode) -> Self {
        self.stages.push(node);
        self
    }

    pub fn output(mut self, slot: &str, path: impl Into<PathBuf>) -> Self {
        self.output = Some(OutputBinding {
            slot: slot.to_string(),
            path: path.into(),
        });
        self
    }

    /// The input binding for a slot, if the slot is a pipeline input.
    pub fn input_for(&self, slot: &str) -> Option<&InputBinding> {
        self.inputs.iter().find(|i| i.slot == slot)
    }
}
