//! Publishing of generated images to blob storage.
//!
//! [`BlobPublisher`] is the seam the output collector calls for every image
//! found on disk. [`S3Publisher`] implements it against any S3-compatible
//! endpoint.

pub mod s3;

use std::path::Path;

use async_trait::async_trait;

pub use s3::{S3Config, S3Publisher};

/// Errors from publishing a file.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),
}

/// Receives a local file for a job and returns a public reference to it.
#[async_trait]
pub trait BlobPublisher: Send + Sync {
    async fn publish(&self, job_id: &str, local_path: &Path) -> Result<String, PublishError>;
}
