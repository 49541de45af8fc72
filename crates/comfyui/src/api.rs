//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (readiness, image upload, workflow
//! submission, history retrieval, model listing) using [`reqwest`].

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// Node class whose `object_info` lists the LoRA files the server can see.
const LORA_LOADER_CLASS: &str = "LoraLoader";

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Identifier used to look the run up in `/history`.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure before any status was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    UnexpectedResponse(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base HTTP URL of the instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Check that the server answers `GET /` with HTTP 200.
    pub async fn ping(&self) -> Result<(), ComfyUIApiError> {
        let response = self.client.get(format!("{}/", self.api_url)).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Upload an input image.
    ///
    /// Sends a multipart `POST /upload/image` with the file under `image`
    /// and `overwrite=true` so re-runs replace earlier uploads.
    pub async fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<(), ComfyUIApiError> {
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")?;
        let form = Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Queue `workflow` under `client_id` via `POST /prompt`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  The returned JSON is
    /// keyed by prompt id and contains the per-node outputs once the
    /// prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List the LoRA file names the server can currently resolve.
    ///
    /// Reads `LoraLoader.input.required.lora_name[0]` from
    /// `GET /object_info/LoraLoader`.
    pub async fn lora_names(&self) -> Result<Vec<String>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/object_info/{}", self.api_url, LORA_LOADER_CLASS))
            .send()
            .await?;

        let info: serde_json::Value = Self::parse_response(response).await?;
        let names = info
            .pointer(&format!("/{LORA_LOADER_CLASS}/input/required/lora_name/0"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ComfyUIApiError::UnexpectedResponse(
                    "object_info has no lora_name choices".to_string(),
                )
            })?;

        Ok(names
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    // ---- private helpers ----

    /// Pass 2xx responses through; anything else becomes
    /// [`ComfyUIApiError::ApiError`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn submit_returns_prompt_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .and(body_partial_json(json!({"prompt": {"3": {"class_type": "KSampler"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "123", "number": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let response = api
            .submit_workflow(&json!({"3": {"class_type": "KSampler"}}), "client")
            .await
            .unwrap();
        assert_eq!(response.prompt_id, "123");
        assert_eq!(response.number, Some(0));
    }

    #[tokio::test]
    async fn submit_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let err = api.submit_workflow(&json!({}), "client").await.unwrap_err();
        assert_matches!(err, ComfyUIApiError::ApiError { status: 400, ref body } if body == "invalid prompt");
    }

    #[tokio::test]
    async fn history_is_fetched_by_prompt_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key": "value"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(format!("{}/", server.uri()));
        assert_eq!(api.get_history("123").await.unwrap(), json!({"key": "value"}));
    }

    #[tokio::test]
    async fn upload_posts_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/image"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        api.upload_image("test_image.png", b"Test Image Data".to_vec())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"overwrite\""));
        assert!(body.contains("filename=\"test_image.png\""));
        assert!(body.contains("Test Image Data"));
    }

    #[tokio::test]
    async fn lora_names_are_read_from_object_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info/LoraLoader"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "LoraLoader": {"input": {"required": {
                    "lora_name": [["a.safetensors", "b.safetensors"]],
                    "strength_model": ["FLOAT", {}]
                }}}
            })))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert_eq!(
            api.lora_names().await.unwrap(),
            vec!["a.safetensors".to_string(), "b.safetensors".to_string()]
        );
    }
}
