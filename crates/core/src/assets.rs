//! Auxiliary asset (LoRA) naming, classification and protection policy.
//!
//! Provides reference classification (remote URL vs local path), filename
//! derivation for downloads, staging directory resolution, and the
//! disposable-name policy deciding which staged files may ever be deleted.

use std::path::{Path, PathBuf};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Extension appended to derived filenames that have none.
pub const DEFAULT_ASSET_EXTENSION: &str = "safetensors";

/// Filename marker of generically-named downloads that are safe to delete.
pub const DEFAULT_DISPOSABLE_MARKER: &str = "pytorch_lora_weights";

// ---------------------------------------------------------------------------
// Reference classification
// ---------------------------------------------------------------------------

/// Whether a reference points at a remote file to download.
pub fn is_remote_reference(reference: &str) -> bool {
    let trimmed = reference.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

/// Derive the local filename for a remote reference.
///
/// Takes the last non-empty URL path segment without query or fragment.
/// Falls back to a random `lora_<uuid>` name and appends
/// [`DEFAULT_ASSET_EXTENSION`] when the segment has no extension.
pub fn derive_filename(url: &str) -> String {
    let clean = url.split('?').next().unwrap_or(url);
    let clean = clean.split('#').next().unwrap_or(clean);

    let path = match clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    let name = path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("lora_{}", uuid::Uuid::new_v4().simple()));

    if Path::new(&name).extension().is_some() {
        name
    } else {
        format!("{name}.{DEFAULT_ASSET_EXTENSION}")
    }
}

/// Final path component of a reference (URL or filesystem path).
pub fn basename(reference: &str) -> &str {
    let clean = reference.split('?').next().unwrap_or(reference);
    clean
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(clean)
}

/// Pick the staging directory for `filename`.
///
/// The first candidate directory already holding the file wins. Otherwise
/// the first candidate is returned. `None` only when no candidates exist.
pub fn resolve_staging_dir(filename: &str, candidates: &[PathBuf]) -> Option<(PathBuf, bool)> {
    candidates
        .iter()
        .find(|dir| dir.join(filename).is_file())
        .map(|dir| (dir.clone(), true))
        .or_else(|| candidates.first().map(|dir| (dir.clone(), false)))
}

// ---------------------------------------------------------------------------
// Protection policy
// ---------------------------------------------------------------------------

/// Whitelist policy: only filenames carrying the disposable marker may be
/// deleted. Every other name is protected regardless of where it came from.
#[derive(Debug, Clone)]
pub struct ProtectionPolicy {
    disposable_marker: String,
}

impl ProtectionPolicy {
    pub fn new(disposable_marker: impl Into<String>) -> Self {
        Self {
            disposable_marker: disposable_marker.into(),
        }
    }

    pub fn disposable_marker(&self) -> &str {
        &self.disposable_marker
    }

    /// Returns `true` if the file at `path` must never be deleted.
    ///
    /// An empty marker protects everything.
    pub fn is_protected(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        self.disposable_marker.is_empty() || !name.contains(&self.disposable_marker)
    }
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DISPOSABLE_MARKER)
    }
}

// ---------------------------------------------------------------------------
// Staged assets
// ---------------------------------------------------------------------------

/// How a staged asset came to be on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    /// Fetched from a URL during this job.
    Downloaded,
    /// URL reference whose file was already present on disk.
    ExistingRemote,
    /// Local path supplied by the caller.
    Local,
}

/// A materialized auxiliary asset.
#[derive(Debug, Clone, Serialize)]
pub struct StagedAsset {
    pub source_reference: String,
    pub local_path: PathBuf,
    /// Filename used inside the rewritten workflow.
    pub assigned_name: String,
    pub scale: f64,
    pub origin: AssetOrigin,
    pub was_downloaded: bool,
    pub is_protected: bool,
}

impl StagedAsset {
    /// Whether the stager hands this asset to cleanup once the job ends.
    pub fn is_cleanup_candidate(&self) -> bool {
        self.origin != AssetOrigin::Local && !self.is_protected
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
