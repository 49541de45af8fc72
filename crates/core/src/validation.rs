//! Inbound job payload validation.
//!
//! [`validate_input`] normalizes the raw `input` value of a job into a
//! [`JobInput`]. Checks run in a fixed order and stop at the first failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

pub const MSG_EMPTY_INPUT: &str = "Please provide input";
pub const MSG_INVALID_JSON: &str = "Invalid JSON format in input";
pub const MSG_MISSING_WORKFLOW: &str = "Missing 'workflow' parameter";
pub const MSG_INVALID_IMAGES: &str =
    "'images' must be a list of objects with 'name' and 'image' keys";
pub const MSG_INVALID_LORAS: &str = "'loras' must be a list of objects with 'path' and 'scale' keys";
pub const MSG_INVALID_WEBHOOK: &str = "'webhookUrl' must be a string";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// An image supplied inline, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputImage {
    pub name: String,
    pub image: String,
}

/// An auxiliary weight file referenced by local path or URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraInput {
    pub path: String,
    pub scale: f64,
}

/// Normalized job input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub workflow: Value,
    pub images: Option<Vec<InputImage>>,
    pub loras: Option<Vec<LoraInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate and normalize a raw job payload.
///
/// The payload is either a JSON object or a string holding one. `null` and
/// blank strings count as absent input. Returns [`JobError::Validation`]
/// carrying one of the fixed messages above.
pub fn validate_input(raw: &Value) -> Result<JobInput, JobError> {
    let decoded;
    let obj = match raw {
        Value::Null => return Err(invalid(MSG_EMPTY_INPUT)),
        Value::String(s) if s.trim().is_empty() => return Err(invalid(MSG_EMPTY_INPUT)),
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s).map_err(|_| invalid(MSG_INVALID_JSON))?;
            decoded.as_object().ok_or_else(|| invalid(MSG_INVALID_JSON))?
        }
        Value::Object(map) => map,
        _ => return Err(invalid(MSG_INVALID_JSON)),
    };

    let workflow = match obj.get("workflow") {
        Some(Value::Null) | None => return Err(invalid(MSG_MISSING_WORKFLOW)),
        Some(workflow) => workflow.clone(),
    };

    let images = match obj.get("images") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_images(value)?),
    };

    let loras = match obj.get("loras") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_loras(value)?),
    };

    let webhook_url = match obj.get("webhookUrl") {
        None | Some(Value::Null) => None,
        Some(Value::String(url)) => Some(url.clone()),
        Some(_) => return Err(invalid(MSG_INVALID_WEBHOOK)),
    };

    Ok(JobInput {
        workflow,
        images,
        loras,
        webhook_url,
    })
}

/// LoRA strength used when `scale` is present but not numeric.
pub const DEFAULT_LORA_SCALE: f64 = 1.0;

fn parse_images(value: &Value) -> Result<Vec<InputImage>, JobError> {
    let items = value.as_array().ok_or_else(|| invalid(MSG_INVALID_IMAGES))?;
    items
        .iter()
        .map(|item| {
            match (field(item, "name"), field(item, "image")) {
                (Some(name), Some(image)) => Ok(InputImage {
                    name: as_text(name),
                    image: as_text(image),
                }),
                _ => Err(invalid(MSG_INVALID_IMAGES)),
            }
        })
        .collect()
}

fn parse_loras(value: &Value) -> Result<Vec<LoraInput>, JobError> {
    let items = value.as_array().ok_or_else(|| invalid(MSG_INVALID_LORAS))?;
    items
        .iter()
        .map(|item| {
            match (field(item, "path"), field(item, "scale")) {
                (Some(path), Some(scale)) => Ok(LoraInput {
                    path: as_text(path),
                    scale: as_scale(scale),
                }),
                _ => Err(invalid(MSG_INVALID_LORAS)),
            }
        })
        .collect()
}

/// A field counts as present when the key exists with a non-null value.
fn field<'a>(item: &'a Value, key: &str) -> Option<&'a Value> {
    item.get(key).filter(|v| !v.is_null())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_scale(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_LORA_SCALE)
}

fn invalid(msg: &str) -> JobError {
    JobError::Validation(msg.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn message(raw: Value) -> String {
        validate_input(&raw).unwrap_err().to_string()
    }

    #[test]
    fn workflow_only() {
        let input = validate_input(&json!({"workflow": {"k": "v"}})).unwrap();
        assert_eq!(input.workflow, json!({"k": "v"}));
        assert!(input.images.is_none());
        assert!(input.loras.is_none());
        assert!(input.webhook_url.is_none());

        assert_eq!(
            serde_json::to_value(&input).unwrap(),
            json!({"workflow": {"k": "v"}, "images": null, "loras": null})
        );
    }

    #[test]
    fn workflow_and_images() {
        let input = validate_input(&json!({
            "workflow": {"key": "value"},
            "images": [{"name": "image1.png", "image": "base64string"}],
        }))
        .unwrap();
        assert_eq!(
            input.images,
            Some(vec![InputImage {
                name: "image1.png".into(),
                image: "base64string".into(),
            }])
        );
    }

    #[test]
    fn loras_and_webhook() {
        let input = validate_input(&json!({
            "workflow": {},
            "loras": [{"path": "https://host/a.safetensors", "scale": 0.8}],
            "webhookUrl": "https://hooks.example.com/done",
        }))
        .unwrap();
        assert_eq!(input.loras.unwrap()[0].scale, 0.8);
        assert_eq!(input.webhook_url.as_deref(), Some("https://hooks.example.com/done"));
    }

    #[test]
    fn missing_workflow() {
        assert_eq!(
            message(json!({"images": [{"name": "image1.png", "image": "x"}]})),
            MSG_MISSING_WORKFLOW
        );
        assert_eq!(message(json!({"workflow": null})), MSG_MISSING_WORKFLOW);
        assert_eq!(message(json!({})), MSG_MISSING_WORKFLOW);
    }

    #[test]
    fn image_without_data_is_rejected() {
        assert_eq!(
            message(json!({"workflow": {"key": "value"}, "images": [{"name": "image1.png"}]})),
            MSG_INVALID_IMAGES
        );
        assert_eq!(
            message(json!({"workflow": {}, "images": [{"image": "abc"}]})),
            MSG_INVALID_IMAGES
        );
        assert_eq!(
            message(json!({"workflow": {}, "images": "not-a-list"})),
            MSG_INVALID_IMAGES
        );
    }

    #[test]
    fn lora_without_scale_is_rejected() {
        assert_eq!(
            message(json!({"workflow": {}, "loras": [{"path": "a.safetensors"}]})),
            MSG_INVALID_LORAS
        );
    }

    #[test]
    fn present_fields_are_accepted_whatever_their_type() {
        let input = validate_input(&json!({
            "workflow": {},
            "images": [{"name": 1, "image": "abc"}],
            "loras": [
                {"path": "a.safetensors", "scale": "0.8"},
                {"path": "b.safetensors", "scale": "strong"},
            ],
        }))
        .unwrap();

        assert_eq!(input.images.unwrap()[0].name, "1");
        let loras = input.loras.unwrap();
        assert_eq!(loras[0].scale, 0.8);
        assert_eq!(loras[1].scale, DEFAULT_LORA_SCALE);
    }

    #[test]
    fn null_field_counts_as_missing() {
        assert_eq!(
            message(json!({"workflow": {}, "loras": [{"path": "a.safetensors", "scale": null}]})),
            MSG_INVALID_LORAS
        );
    }

    #[test]
    fn images_checked_before_loras() {
        assert_eq!(
            message(json!({"workflow": {}, "images": [{}], "loras": [{}]})),
            MSG_INVALID_IMAGES
        );
    }

    #[test]
    fn non_string_webhook_is_rejected() {
        assert_eq!(
            message(json!({"workflow": {}, "webhookUrl": 42})),
            MSG_INVALID_WEBHOOK
        );
    }

    #[test]
    fn json_string_input() {
        let input = validate_input(&json!("{\"workflow\": {\"key\": \"value\"}}")).unwrap();
        assert_eq!(input.workflow, json!({"key": "value"}));
    }

    #[test]
    fn invalid_json_string() {
        assert_eq!(message(json!("invalid json")), MSG_INVALID_JSON);
        assert_eq!(message(json!("[1, 2]")), MSG_INVALID_JSON);
        assert_eq!(message(json!(42)), MSG_INVALID_JSON);
    }

    #[test]
    fn empty_input() {
        assert_matches!(validate_input(&Value::Null), Err(JobError::Validation(m)) if m == MSG_EMPTY_INPUT);
        assert_eq!(message(json!("   ")), MSG_EMPTY_INPUT);
    }
}
