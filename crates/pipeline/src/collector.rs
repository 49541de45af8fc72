//! Collects produced images from the ComfyUI output directory.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use relay_cloud::BlobPublisher;
use relay_core::error::JobError;
use relay_core::job::JobContext;
use relay_core::outputs::{flatten_image_outputs, has_outputs};
use serde::Serialize;

use crate::outcome::ReportStatus;

/// One entry of the output list, tagged by how the image is delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputImage {
    /// Published to the bucket; `data` is the public URL.
    S3Url { filename: String, data: String },
    /// Inline base64 file contents.
    Base64 { filename: String, data: String },
    /// Listed by ComfyUI but not found on disk.
    Missing { filename: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputReport {
    pub status: ReportStatus,
    pub images: Vec<OutputImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Turns a history outputs map into deliverable images.
#[derive(Clone)]
pub struct OutputCollector {
    output_root: PathBuf,
    publisher: Option<Arc<dyn BlobPublisher>>,
}

impl OutputCollector {
    pub fn new(output_root: impl Into<PathBuf>, publisher: Option<Arc<dyn BlobPublisher>>) -> Self {
        Self {
            output_root: output_root.into(),
            publisher,
        }
    }

    /// Resolve every image descriptor and publish or inline it, in order.
    ///
    /// A missing file yields a `missing` entry instead of failing the batch.
    /// An empty outputs map is the only error.
    pub async fn collect(&self, ctx: &JobContext, outputs: &serde_json::Value) -> OutputReport {
        if !has_outputs(outputs) {
            tracing::error!(job_id = %ctx.job_id, "ComfyUI returned no outputs");
            return OutputReport {
                status: ReportStatus::Error,
                images: Vec::new(),
                message: Some("No outputs found".to_string()),
            };
        }

        let mut images = Vec::new();
        for descriptor in flatten_image_outputs(outputs) {
            let relative = descriptor.relative_path();
            let local_path = self.output_root.join(&relative);
            let filename = relative.display().to_string();

            if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
                let message = JobError::OutputMissing(local_path.display().to_string()).to_string();
                tracing::warn!(job_id = %ctx.job_id, path = %local_path.display(), "Output image missing");
                images.push(OutputImage::Missing { filename, message });
                continue;
            }

            if let Some(publisher) = &self.publisher {
                match publisher.publish(&ctx.job_id, &local_path).await {
                    Ok(url) => {
                        images.push(OutputImage::S3Url { filename, data: url });
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(
                            job_id = %ctx.job_id,
                            path = %local_path.display(),
                            error = %e,
                            "Publishing failed, returning image inline",
                        );
                    }
                }
            }

            match tokio::fs::read(&local_path).await {
                Ok(bytes) => images.push(OutputImage::Base64 {
                    filename,
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }),
                Err(e) => {
                    tracing::warn!(job_id = %ctx.job_id, path = %local_path.display(), error = %e, "Failed to read output image");
                    images.push(OutputImage::Missing {
                        filename,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(job_id = %ctx.job_id, count = images.len(), "Outputs collected");
        OutputReport {
            status: ReportStatus::Success,
            images,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use relay_cloud::PublishError;
    use serde_json::json;

    use super::*;

    fn ctx() -> JobContext {
        JobContext::new(Some("job-1".into()))
    }

    struct FakePublisher;

    #[async_trait]
    impl BlobPublisher for FakePublisher {
        async fn publish(&self, job_id: &str, local_path: &Path) -> Result<String, PublishError> {
            let name = local_path.file_name().unwrap().to_string_lossy();
            Ok(format!("https://bucket.example.com/{job_id}/{name}"))
        }
    }

    #[tokio::test]
    async fn empty_outputs_is_an_error_with_no_items() {
        let collector = OutputCollector::new("/nonexistent", None);
        let report = collector.collect(&ctx(), &json!({})).await;
        assert_eq!(report.status, ReportStatus::Error);
        assert!(report.images.is_empty());
    }

    #[tokio::test]
    async fn inlines_present_files_and_marks_missing_ones() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("batch")).unwrap();
        std::fs::write(root.path().join("a.png"), b"hello").unwrap();
        std::fs::write(root.path().join("batch/c.png"), b"world").unwrap();

        let outputs = json!({
            "9": {"images": [
                {"filename": "a.png", "subfolder": ""},
                {"filename": "b.png", "subfolder": ""},
                {"filename": "c.png", "subfolder": "batch"}
            ]}
        });

        let collector = OutputCollector::new(root.path(), None);
        let report = collector.collect(&ctx(), &outputs).await;

        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(
            report.images[0],
            OutputImage::Base64 { filename: "a.png".into(), data: "aGVsbG8=".into() }
        );
        assert!(matches!(&report.images[1], OutputImage::Missing { filename, .. } if filename == "b.png"));
        assert!(matches!(&report.images[2], OutputImage::Base64 { data, .. } if data == "d29ybGQ="));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["images"][0]["type"], "base64");
        assert_eq!(value["images"][1]["type"], "missing");
    }

    #[tokio::test]
    async fn publishes_when_configured() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.png"), b"hello").unwrap();

        let collector = OutputCollector::new(root.path(), Some(Arc::new(FakePublisher)));
        let report = collector
            .collect(&ctx(), &json!({"9": {"images": [{"filename": "a.png"}]}}))
            .await;

        assert_eq!(
            report.images,
            vec![OutputImage::S3Url {
                filename: "a.png".into(),
                data: "https://bucket.example.com/job-1/a.png".into(),
            }]
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["images"][0]["type"], "s3_url");
    }
}
