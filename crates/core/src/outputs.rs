//! Flattening of ComfyUI history outputs into image descriptors.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// One produced image as reported in a node's `images` output list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
}

impl ImageDescriptor {
    /// Path relative to the server's output root.
    pub fn relative_path(&self) -> PathBuf {
        if self.subfolder.is_empty() {
            PathBuf::from(&self.filename)
        } else {
            Path::new(&self.subfolder).join(&self.filename)
        }
    }
}

/// Whether a history outputs map carries at least one non-empty node output.
pub fn has_outputs(outputs: &Value) -> bool {
    outputs
        .as_object()
        .is_some_and(|nodes| nodes.values().any(|node| !is_empty_value(node)))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Flatten `{node_id: {images: [{filename, subfolder}]}}` into descriptors,
/// preserving node order then list order. Entries that do not parse are
/// skipped.
pub fn flatten_image_outputs(outputs: &Value) -> Vec<ImageDescriptor> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };

    nodes
        .values()
        .filter_map(|node| node.get("images").and_then(Value::as_array))
        .flatten()
        .filter_map(|image| serde_json::from_value::<ImageDescriptor>(image.clone()).ok())
        .collect()
}
