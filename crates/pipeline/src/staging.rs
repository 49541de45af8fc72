//! Asset staging: inline image uploads and LoRA materialization.
//!
//! Images are decoded and pushed to the ComfyUI upload endpoint. LoRAs given
//! as URLs are downloaded into the first matching staging directory, or
//! reused when the file is already there. Local LoRA paths are used as-is.
//! The stager alone decides which files later go to cleanup.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::models::{missing_loras, register_lora_dir};
use relay_core::assets::{
    basename, derive_filename, is_remote_reference, resolve_staging_dir, AssetOrigin,
    ProtectionPolicy, StagedAsset,
};
use relay_core::error::JobError;
use relay_core::job::JobContext;
use relay_core::validation::{InputImage, LoraInput};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::outcome::ReportStatus;

// ---------------------------------------------------------------------------
// Image upload
// ---------------------------------------------------------------------------

/// Aggregate result of uploading the inline images.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub status: ReportStatus,
    pub message: String,
    pub details: Vec<String>,
}

/// Decode a base64 image, accepting an optional `data:*;base64,` prefix.
fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let data = encoded
        .split_once("base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

/// Upload every image, continuing past individual failures.
///
/// Any failed item makes the whole upload a [`JobError::Upload`]. Images
/// uploaded before the failure are left on the server.
pub async fn upload_images(
    ctx: &JobContext,
    api: &ComfyUIApi,
    images: &[InputImage],
) -> Result<UploadReport, JobError> {
    let mut details = Vec::with_capacity(images.len());
    let mut failures = Vec::new();

    for image in images {
        let result = match decode_image(&image.image) {
            Ok(bytes) => api
                .upload_image(&image.name, bytes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("invalid base64 data: {e}")),
        };

        match result {
            Ok(()) => {
                tracing::debug!(job_id = %ctx.job_id, name = %image.name, "Image uploaded");
                details.push(format!("Successfully uploaded {}", image.name));
            }
            Err(e) => {
                tracing::warn!(job_id = %ctx.job_id, name = %image.name, error = %e, "Image upload failed");
                failures.push(format!("Error uploading {}: {e}", image.name));
            }
        }
    }

    if !failures.is_empty() {
        return Err(JobError::Upload(failures));
    }

    tracing::info!(job_id = %ctx.job_id, count = images.len(), "Images uploaded");
    Ok(UploadReport {
        status: ReportStatus::Success,
        message: "All images uploaded successfully".to_string(),
        details,
    })
}

// ---------------------------------------------------------------------------
// LoRA staging
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    HttpStatus(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of staging the LoRA list.
#[derive(Debug, Clone, Default)]
pub struct LoraStagingReport {
    /// Usable assets in input order.
    pub assets: Vec<StagedAsset>,
    /// Per-item failures; the job continues without these entries.
    pub errors: Vec<JobError>,
}

impl LoraStagingReport {
    pub fn status(&self) -> ReportStatus {
        if self.errors.is_empty() {
            ReportStatus::Success
        } else {
            ReportStatus::Error
        }
    }

    /// Paths cleanup may remove once the job ends. Fixed at staging time.
    pub fn cleanup_candidates(&self) -> Vec<PathBuf> {
        self.assets
            .iter()
            .filter(|asset| asset.is_cleanup_candidate())
            .map(|asset| asset.local_path.clone())
            .collect()
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Outcome of the post-staging visibility check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Every staged name is already listed by the server.
    Visible,
    /// Missing names were found and their directories registered.
    Registered(Vec<PathBuf>),
    /// The check or the registration failed.
    Warning(String),
}

/// Materializes LoRA references into the staging directories.
#[derive(Clone)]
pub struct LoraStager {
    client: reqwest::Client,
    staging_dirs: Vec<PathBuf>,
    policy: ProtectionPolicy,
}

impl LoraStager {
    pub fn new(staging_dirs: Vec<PathBuf>, policy: ProtectionPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            staging_dirs,
            policy,
        }
    }

    /// Stage every entry, recording per-item download errors.
    pub async fn stage(&self, ctx: &JobContext, loras: &[LoraInput]) -> LoraStagingReport {
        let mut report = LoraStagingReport::default();

        for lora in loras {
            if !is_remote_reference(&lora.path) {
                report.assets.push(self.local_asset(lora));
                continue;
            }

            match self.stage_remote(ctx, lora).await {
                Ok(asset) => report.assets.push(asset),
                Err(e) => {
                    tracing::warn!(job_id = %ctx.job_id, reference = %lora.path, error = %e, "LoRA staging failed");
                    report.errors.push(e);
                }
            }
        }

        tracing::info!(
            job_id = %ctx.job_id,
            staged = report.assets.len(),
            failed = report.errors.len(),
            cleanup_candidates = report.cleanup_candidates().len(),
            "LoRA staging finished",
        );
        report
    }

    fn local_asset(&self, lora: &LoraInput) -> StagedAsset {
        let local_path = PathBuf::from(&lora.path);
        StagedAsset {
            assigned_name: basename(&lora.path).to_string(),
            is_protected: self.policy.is_protected(&local_path),
            source_reference: lora.path.clone(),
            local_path,
            scale: lora.scale,
            origin: AssetOrigin::Local,
            was_downloaded: false,
        }
    }

    async fn stage_remote(&self, ctx: &JobContext, lora: &LoraInput) -> Result<StagedAsset, JobError> {
        let download_error = |message: String| JobError::Download {
            reference: lora.path.clone(),
            message,
        };

        let filename = derive_filename(&lora.path);
        let (dir, exists) = resolve_staging_dir(&filename, &self.staging_dirs)
            .ok_or_else(|| download_error("no staging directory configured".to_string()))?;
        let local_path = dir.join(&filename);

        let origin = if exists {
            tracing::info!(job_id = %ctx.job_id, path = %local_path.display(), "LoRA already on disk, skipping download");
            AssetOrigin::ExistingRemote
        } else {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| download_error(e.to_string()))?;
            self.download(&lora.path, &local_path)
                .await
                .map_err(|e| download_error(e.to_string()))?;
            tracing::info!(job_id = %ctx.job_id, path = %local_path.display(), "LoRA downloaded");
            AssetOrigin::Downloaded
        };

        Ok(StagedAsset {
            source_reference: lora.path.clone(),
            is_protected: self.policy.is_protected(&local_path),
            local_path,
            assigned_name: filename,
            scale: lora.scale,
            was_downloaded: origin == AssetOrigin::Downloaded,
            origin,
        })
    }

    /// Stream `url` into `dest` through a `.part` file.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let mut part_name = dest.as_os_str().to_owned();
        part_name.push(".part");
        let part = PathBuf::from(part_name);

        let result = self.download_to(url, &part).await;
        match result {
            Ok(()) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %part.display(), error = %rm, "Failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn download_to(&self, url: &str, part: &Path) -> Result<(), DownloadError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(part).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Check that ComfyUI lists every staged remote asset, registering the
    /// staging directories of missing ones.
    pub async fn verify(
        &self,
        ctx: &JobContext,
        api: &ComfyUIApi,
        comfy_root: &Path,
        assets: &[StagedAsset],
    ) -> Verification {
        let staged: Vec<&StagedAsset> = assets
            .iter()
            .filter(|asset| asset.origin != AssetOrigin::Local)
            .collect();
        if staged.is_empty() {
            return Verification::Visible;
        }

        let names: Vec<String> = staged.iter().map(|a| a.assigned_name.clone()).collect();
        let missing = match missing_loras(api, &names).await {
            Ok(missing) => missing,
            Err(e) => {
                tracing::warn!(job_id = %ctx.job_id, error = %e, "LoRA visibility check failed");
                return Verification::Warning(format!("Could not verify LoRA visibility: {e}"));
            }
        };
        if missing.is_empty() {
            return Verification::Visible;
        }

        let mut dirs: Vec<PathBuf> = Vec::new();
        for asset in staged.iter().filter(|a| missing.contains(&a.assigned_name)) {
            if let Some(dir) = asset.local_path.parent() {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
        }

        for dir in &dirs {
            if let Err(e) = register_lora_dir(comfy_root, dir) {
                tracing::warn!(job_id = %ctx.job_id, dir = %dir.display(), error = %e, "LoRA directory registration failed");
                return Verification::Warning(format!(
                    "LoRAs not visible to ComfyUI ({}) and registration of {} failed: {e}",
                    missing.join(", "),
                    dir.display()
                ));
            }
        }

        tracing::info!(job_id = %ctx.job_id, missing = ?missing, "Registered staging directories for unlisted LoRAs");
        Verification::Registered(dirs)
    }
}
