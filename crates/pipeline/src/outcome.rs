//! Result types returned from a job run.
//!
//! The primary outcome (output or error) is kept apart from the outcomes
//! of the best-effort side channels, which are attached but never replace it.

use relay_core::error::JobError;
use relay_core::job::JobState;
use relay_core::types::JobId;
use relay_events::WebhookOutcome;
use serde::Serialize;

use crate::cleanup::CleanupReport;

/// Aggregate status of a multi-item stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Warning,
    Error,
}

/// Outcomes of the side channels that ran for a job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SideEffects {
    /// Number of state snapshot writes that failed.
    pub state_writes_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookOutcome>,
}

/// What the handler returns for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Ask the hosting runtime to recycle the worker after this job.
    pub refresh_worker: bool,
    pub side_effects: SideEffects,
}

impl JobOutcome {
    pub fn completed(id: JobId, output: serde_json::Value, refresh_worker: bool) -> Self {
        Self {
            id,
            status: JobState::Completed,
            output: Some(output),
            error: None,
            error_kind: None,
            refresh_worker,
            side_effects: SideEffects::default(),
        }
    }

    pub fn failed(id: JobId, error: &JobError, refresh_worker: bool) -> Self {
        Self {
            id,
            status: JobState::Failed,
            output: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            refresh_worker,
            side_effects: SideEffects::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobState::Completed
    }
}
