//! LoRA visibility checks and search-path registration.
//!
//! ComfyUI only resolves LoRA names found under its configured model
//! directories. Staging directories outside the default tree are added via
//! a `loras:` entry in `{COMFY_ROOT}/extra_model_paths.yaml`.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// File ComfyUI reads additional model search paths from.
pub const EXTRA_MODEL_PATHS_FILE: &str = "extra_model_paths.yaml";

/// Top-level section owned by the worker. Other sections are left as found.
pub const STAGING_SECTION: &str = "relay_staging";

/// Errors from editing `extra_model_paths.yaml`.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to access model paths config: {0}")]
    Io(#[from] std::io::Error),

    #[error("model paths config is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document or the staging section has an unexpected shape.
    #[error("model paths config is malformed: {0}")]
    Malformed(&'static str),
}

/// Names in `expected` that the server does not currently list.
pub async fn missing_loras(
    api: &ComfyUIApi,
    expected: &[String],
) -> Result<Vec<String>, ComfyUIApiError> {
    let visible = api.lora_names().await?;
    Ok(expected
        .iter()
        .filter(|name| !visible.iter().any(|v| v == *name))
        .cloned()
        .collect())
}

/// Add `lora_dir` to the `loras` search paths of the staging section.
///
/// ComfyUI reads a multi-line `loras` value as one directory per line, so
/// every registered directory lives in that single entry. Returns `true`
/// when the file was changed; the server picks up the new path on its next
/// model scan.
pub fn register_lora_dir(comfy_root: &Path, lora_dir: &Path) -> Result<bool, RegistrationError> {
    let config_path = comfy_root.join(EXTRA_MODEL_PATHS_FILE);
    let dir = lora_dir.to_string_lossy().into_owned();

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let parsed = if contents.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str::<Value>(&contents)?
    };
    let mut root = match parsed {
        Value::Null => Mapping::new(),
        Value::Mapping(map) => map,
        _ => return Err(RegistrationError::Malformed("document root is not a mapping")),
    };

    let section = root
        .entry(Value::from(STAGING_SECTION))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Value::Mapping(section) = section else {
        return Err(RegistrationError::Malformed("staging section is not a mapping"));
    };

    let mut dirs: Vec<String> = match section.get("loras") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(paths)) => paths
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Some(_) => return Err(RegistrationError::Malformed("loras entry is not a string")),
    };
    if dirs.iter().any(|existing| Path::new(existing) == lora_dir) {
        return Ok(false);
    }
    dirs.push(dir.clone());

    let mut joined = dirs.join("\n");
    joined.push('\n');
    section.insert(Value::from("loras"), Value::from(joined));

    std::fs::write(&config_path, serde_yaml::to_string(&Value::Mapping(root))?)?;

    tracing::info!(
        config = %config_path.display(),
        lora_dir = %dir,
        registered = dirs.len(),
        "Registered LoRA directory with ComfyUI",
    );
    Ok(true)
}
