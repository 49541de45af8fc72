//! ComfyUI workflow graph model and asset reference patching.
//!
//! A workflow is an object keyed by node id where each node carries a
//! `class_type` and an `inputs` object. [`patch_workflow`] rewrites the
//! inputs that reference auxiliary assets so they point at the files staged
//! on local disk. Two strategies exist:
//!
//! - **Structural**: for Flux-family graphs, rewrite the `lora_name` input
//!   of LoRA loader nodes by matching it against each staged reference.
//! - **Reference visitor**: for every other graph, walk all node inputs and
//!   replace string leaves under asset-reference keys that equal an original
//!   reference or its basename.
//!
//! Patching never fails the job: [`patch_or_original`] falls back to the
//! unpatched workflow.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assets::{basename, AssetOrigin, StagedAsset};

// ---------------------------------------------------------------------------
// Node class types
// ---------------------------------------------------------------------------

/// UNet loader, present in Flux graphs.
const UNET_LOADER_CLASS: &str = "UNETLoader";

/// Dual CLIP loader, present in Flux graphs.
const DUAL_CLIP_LOADER_CLASS: &str = "DualCLIPLoader";

/// LoRA loader classes rewritten by the structural strategy.
const LORA_LOADER_CLASSES: &[&str] = &["LoraLoaderModelOnly", "LoraLoader"];

/// Input holding the LoRA file name on loader nodes.
const LORA_NAME_INPUT: &str = "lora_name";

/// Input keys (besides any key containing `lora`) that hold asset references.
const ASSET_REFERENCE_KEYS: &[&str] = &["path", "url", "file", "filename"];

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single node of a workflow graph. Unknown fields are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view of a workflow, nodes in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph {
    pub nodes: Vec<(String, WorkflowNode)>,
}

/// Generation model family inferred from node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFamily {
    Flux,
    Standard,
}

/// Which patching strategy ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    Structural,
    ReferenceVisitor,
    /// Patching failed and the original workflow is used.
    Unpatched,
}

/// Result of a patch run.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub workflow: Value,
    pub strategy: PatchStrategy,
    pub replacements: usize,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow must be a JSON object keyed by node id")]
    NotAnObject,

    #[error("Node '{node_id}' is not a valid workflow node: {source}")]
    InvalidNode {
        node_id: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize workflow: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Graph conversion
// ---------------------------------------------------------------------------

impl WorkflowGraph {
    pub fn from_value(value: &Value) -> Result<Self, WorkflowError> {
        let obj = value.as_object().ok_or(WorkflowError::NotAnObject)?;
        let nodes = obj
            .iter()
            .map(|(node_id, node)| {
                serde_json::from_value::<WorkflowNode>(node.clone())
                    .map(|node| (node_id.clone(), node))
                    .map_err(|source| WorkflowError::InvalidNode {
                        node_id: node_id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { nodes })
    }

    pub fn to_value(&self) -> Result<Value, WorkflowError> {
        let mut obj = Map::new();
        for (node_id, node) in &self.nodes {
            obj.insert(node_id.clone(), serde_json::to_value(node)?);
        }
        Ok(Value::Object(obj))
    }

    pub fn has_class(&self, class_type: &str) -> bool {
        self.nodes.iter().any(|(_, node)| node.class_type == class_type)
    }

    /// Flux graphs load a UNet and a dual CLIP encoder side by side.
    pub fn family(&self) -> WorkflowFamily {
        if self.has_class(UNET_LOADER_CLASS) && self.has_class(DUAL_CLIP_LOADER_CLASS) {
            WorkflowFamily::Flux
        } else {
            WorkflowFamily::Standard
        }
    }
}

// ---------------------------------------------------------------------------
// Patching
// ---------------------------------------------------------------------------

/// Rewrite asset references in `workflow` to the staged local files.
///
/// The structural strategy only runs when `structural_enabled` is set and
/// the graph is a Flux graph. When nothing was replaced the input value is
/// returned unchanged.
pub fn patch_workflow(
    workflow: &Value,
    assets: &[StagedAsset],
    structural_enabled: bool,
) -> Result<PatchOutcome, WorkflowError> {
    let mut graph = WorkflowGraph::from_value(workflow)?;

    let (strategy, replacements) =
        if structural_enabled && graph.family() == WorkflowFamily::Flux {
            (PatchStrategy::Structural, patch_loader_nodes(&mut graph, assets))
        } else {
            let mapping = reference_mapping(assets);
            let mut replacements = 0;
            for (_, node) in graph.nodes.iter_mut() {
                for (key, value) in node.inputs.iter_mut() {
                    replacements += rewrite_references(key, value, &mapping);
                }
            }
            (PatchStrategy::ReferenceVisitor, replacements)
        };

    let workflow = if replacements == 0 {
        workflow.clone()
    } else {
        graph.to_value()?
    };

    Ok(PatchOutcome {
        workflow,
        strategy,
        replacements,
        fallback_reason: None,
    })
}

/// [`patch_workflow`], falling back to the original workflow on any error.
pub fn patch_or_original(
    workflow: &Value,
    assets: &[StagedAsset],
    structural_enabled: bool,
) -> PatchOutcome {
    patch_workflow(workflow, assets, structural_enabled).unwrap_or_else(|e| PatchOutcome {
        workflow: workflow.clone(),
        strategy: PatchStrategy::Unpatched,
        replacements: 0,
        fallback_reason: Some(e.to_string()),
    })
}

/// Structural strategy: match each loader's `lora_name` against the staged
/// references by full reference, original filename, then basename. First
/// match wins for a node.
fn patch_loader_nodes(graph: &mut WorkflowGraph, assets: &[StagedAsset]) -> usize {
    let mut replacements = 0;

    for (_, node) in graph.nodes.iter_mut() {
        if !LORA_LOADER_CLASSES.contains(&node.class_type.as_str()) {
            continue;
        }
        let Some(declared) = node.inputs.get(LORA_NAME_INPUT).and_then(Value::as_str) else {
            continue;
        };
        let declared = declared.to_string();

        let matched = assets.iter().find(|asset| {
            let original_name = basename(&asset.source_reference);
            declared == asset.source_reference
                || declared == original_name
                || basename(&declared) == original_name
        });

        if let Some(asset) = matched {
            node.inputs.insert(
                LORA_NAME_INPUT.to_string(),
                Value::String(asset.assigned_name.clone()),
            );
            replacements += 1;
        }
    }

    replacements
}

/// Original reference -> local path, original basename -> local basename,
/// for every remote-sourced asset.
fn reference_mapping(assets: &[StagedAsset]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for asset in assets.iter().filter(|a| a.origin != AssetOrigin::Local) {
        mapping.insert(
            asset.source_reference.clone(),
            asset.local_path.to_string_lossy().into_owned(),
        );
        mapping
            .entry(basename(&asset.source_reference).to_string())
            .or_insert_with(|| asset.assigned_name.clone());
    }
    mapping
}

fn is_asset_reference_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("lora") || ASSET_REFERENCE_KEYS.contains(&key)
}

/// Visit `value` (the input stored under `key`) and replace matching
/// string leaves. Nested objects use their own keys, arrays inherit `key`.
fn rewrite_references(key: &str, value: &mut Value, mapping: &HashMap<String, String>) -> usize {
    match value {
        Value::String(s) if is_asset_reference_key(key) => match mapping.get(s.as_str()) {
            Some(replacement) if replacement != s => {
                *s = replacement.clone();
                1
            }
            _ => 0,
        },
        Value::Object(obj) => obj
            .iter_mut()
            .map(|(k, v)| rewrite_references(k, v, mapping))
            .sum(),
        Value::Array(items) => items
            .iter_mut()
            .map(|v| rewrite_references(key, v, mapping))
            .sum(),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
