//! S3-compatible blob publisher.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;

use crate::{BlobPublisher, PublishError};

/// Default region when `BUCKET_REGION` is not set.
const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the image bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `BUCKET_ENDPOINT_URL` is not set, signalling that
    /// images should be returned inline instead.
    ///
    /// | Variable                   | Required | Default                        |
    /// |----------------------------|----------|--------------------------------|
    /// | `BUCKET_ENDPOINT_URL`      | yes      |                                |
    /// | `BUCKET_NAME`              | no       | first label of the endpoint host |
    /// | `BUCKET_REGION`            | no       | `us-east-1`                    |
    /// | `BUCKET_ACCESS_KEY_ID`     | no       | AWS default chain              |
    /// | `BUCKET_SECRET_ACCESS_KEY` | no       | AWS default chain              |
    pub fn from_env() -> Option<Self> {
        let endpoint_url = std::env::var("BUCKET_ENDPOINT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let bucket = std::env::var("BUCKET_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| bucket_from_endpoint(&endpoint_url));
        Some(Self {
            bucket,
            region: std::env::var("BUCKET_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key_id: non_empty_env("BUCKET_ACCESS_KEY_ID"),
            secret_access_key: non_empty_env("BUCKET_SECRET_ACCESS_KEY"),
            endpoint_url,
        })
    }

    /// Public reference for an uploaded object (path-style addressing).
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint_url.trim_end_matches('/'),
            self.bucket,
            key
        )
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// `https://images.s3.amazonaws.com` -> `images`.
fn bucket_from_endpoint(endpoint_url: &str) -> String {
    let host = endpoint_url
        .split("://")
        .nth(1)
        .unwrap_or(endpoint_url)
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    host.split('.').next().unwrap_or_default().to_string()
}

/// MIME type by file extension.
fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Uploads images to `{bucket}/{job_id}/{filename}`.
pub struct S3Publisher {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

impl S3Publisher {
    /// Build the S3 client. Explicit keys take precedence over the AWS
    /// default credential chain.
    pub async fn new(config: S3Config) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(&config.endpoint_url)
            .force_path_style(true);

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "relay-env",
            ));
        }

        tracing::info!(
            endpoint = %config.endpoint_url,
            bucket = %config.bucket,
            "S3 image publisher configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            config,
        }
    }
}

#[async_trait]
impl BlobPublisher for S3Publisher {
    async fn publish(&self, job_id: &str, local_path: &Path) -> Result<String, PublishError> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PublishError::InvalidPath(local_path.display().to_string()))?;
        tokio::fs::metadata(local_path).await?;

        let key = format!("{job_id}/{file_name}");
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(content_type(local_path))
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        let url = self.config.object_url(&key);
        tracing::info!(job_id, url = %url, "Image published");
        Ok(url)
    }
}
