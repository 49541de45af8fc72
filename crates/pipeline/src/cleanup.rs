//! Best-effort removal of staged LoRA files.
//!
//! Only paths handed over by the stager are ever considered, and each one
//! is re-checked here against the protection policy and the staging
//! directories before deletion. Nothing in this module can fail a job.

use std::path::{Path, PathBuf};

use relay_core::assets::ProtectionPolicy;
use relay_core::error::JobError;
use relay_core::job::JobContext;
use serde::Serialize;

use crate::outcome::ReportStatus;

pub const SKIP_NON_EXISTENT: &str = "non-existent";
pub const SKIP_PROTECTED: &str = "protected";
pub const SKIP_OUTSIDE_STAGING: &str = "outside staging directories";

/// A candidate left in place, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

/// Per-path result of a cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub status: ReportStatus,
    pub deleted: Vec<String>,
    pub skipped: Vec<SkippedPath>,
    pub errors: Vec<String>,
}

/// Deletes disposable staged assets.
#[derive(Clone)]
pub struct CleanupManager {
    staging_dirs: Vec<PathBuf>,
    policy: ProtectionPolicy,
}

impl CleanupManager {
    pub fn new(staging_dirs: Vec<PathBuf>, policy: ProtectionPolicy) -> Self {
        Self {
            staging_dirs,
            policy,
        }
    }

    /// Delete every eligible candidate. Running twice over the same list is
    /// harmless: the second pass skips everything as non-existent.
    pub async fn cleanup(&self, ctx: &JobContext, candidates: &[PathBuf]) -> CleanupReport {
        let mut deleted = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = Vec::new();

        for path in candidates {
            let display_path = path.display().to_string();
            let skip = |reason: &str| SkippedPath {
                path: display_path.clone(),
                reason: reason.to_string(),
            };

            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                skipped.push(skip(SKIP_NON_EXISTENT));
                continue;
            }
            if self.policy.is_protected(path) {
                tracing::debug!(job_id = %ctx.job_id, path = %display_path, "Keeping protected asset");
                skipped.push(skip(SKIP_PROTECTED));
                continue;
            }
            if !self.is_under_staging_dir(path).await {
                tracing::warn!(job_id = %ctx.job_id, path = %display_path, "Refusing to delete file outside staging directories");
                skipped.push(skip(SKIP_OUTSIDE_STAGING));
                continue;
            }

            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    tracing::info!(job_id = %ctx.job_id, path = %display_path, "Deleted staged asset");
                    deleted.push(display_path);
                }
                Err(e) => {
                    tracing::warn!(job_id = %ctx.job_id, path = %display_path, error = %e, "Failed to delete staged asset");
                    errors.push(format!("{display_path}: {e}"));
                }
            }
        }

        let status = if errors.is_empty() {
            ReportStatus::Success
        } else {
            tracing::warn!(
                job_id = %ctx.job_id,
                error = %JobError::CleanupWarning(errors.clone()),
                "Cleanup finished with errors",
            );
            ReportStatus::Warning
        };

        CleanupReport {
            status,
            deleted,
            skipped,
            errors,
        }
    }

    async fn is_under_staging_dir(&self, path: &Path) -> bool {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());

        for dir in &self.staging_dirs {
            let dir = tokio::fs::canonicalize(dir)
                .await
                .unwrap_or_else(|_| dir.clone());
            if resolved.starts_with(&dir) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> JobContext {
        JobContext::new(Some("job-1".into()))
    }

    #[tokio::test]
    async fn deletes_only_disposable_files_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let disposable = dir.path().join("pytorch_lora_weights.safetensors");
        let named = dir.path().join("my_custom_model.safetensors");
        std::fs::write(&disposable, b"a").unwrap();
        std::fs::write(&named, b"b").unwrap();

        let manager = CleanupManager::new(vec![dir.path().to_path_buf()], ProtectionPolicy::default());
        let candidates = vec![disposable.clone(), named.clone()];

        let first = manager.cleanup(&ctx(), &candidates).await;
        assert_eq!(first.status, ReportStatus::Success);
        assert_eq!(first.deleted, vec![disposable.display().to_string()]);
        assert_eq!(first.skipped[0].reason, SKIP_PROTECTED);
        assert!(!disposable.exists());
        assert!(named.exists());

        std::fs::remove_file(&named).unwrap();
        let second = manager.cleanup(&ctx(), &candidates).await;
        assert!(second.deleted.is_empty());
        assert!(second.skipped.iter().all(|s| s.reason == SKIP_NON_EXISTENT));
        assert_eq!(second.skipped.len(), 2);
    }

    #[tokio::test]
    async fn never_deletes_outside_staging_dirs() {
        let staging = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let stray = elsewhere.path().join("pytorch_lora_weights.safetensors");
        std::fs::write(&stray, b"a").unwrap();

        let manager = CleanupManager::new(vec![staging.path().to_path_buf()], ProtectionPolicy::default());
        let report = manager.cleanup(&ctx(), &[stray.clone()]).await;

        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped[0].reason, SKIP_OUTSIDE_STAGING);
        assert!(stray.exists());
    }

    #[tokio::test]
    async fn custom_marker_changes_what_is_disposable() {
        let dir = tempfile::tempdir().unwrap();
        let default_name = dir.path().join("pytorch_lora_weights.safetensors");
        let tmp_name = dir.path().join("tmp_style.safetensors");
        std::fs::write(&default_name, b"a").unwrap();
        std::fs::write(&tmp_name, b"b").unwrap();

        let manager = CleanupManager::new(vec![dir.path().to_path_buf()], ProtectionPolicy::new("tmp_"));
        let report = manager
            .cleanup(&ctx(), &[default_name.clone(), tmp_name.clone()])
            .await;

        assert_eq!(report.deleted, vec![tmp_name.display().to_string()]);
        assert!(default_name.exists());
    }
}
