//! The job record persisted to the state store.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// States are written last-write-wins; no transition table is enforced.
/// `Completed` and `Failed` end the run but later writes are not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    NotStarted,
    ProcessingLoras,
    LoraProcessingPartial,
    LoraProcessingComplete,
    LoraVerificationWarning,
    InQueue,
    Completed,
    Failed,
}

impl JobState {
    /// Wire name as stored in snapshots and webhook payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::NotStarted => "NOT_STARTED",
            JobState::ProcessingLoras => "PROCESSING_LORAS",
            JobState::LoraProcessingPartial => "LORA_PROCESSING_PARTIAL",
            JobState::LoraProcessingComplete => "LORA_PROCESSING_COMPLETE",
            JobState::LoraVerificationWarning => "LORA_VERIFICATION_WARNING",
            JobState::InQueue => "IN_QUEUE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Snapshot of one unit of work, serialized under `job:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Free-form detail attached to the latest state write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            state: JobState::NotStarted,
            message: None,
            webhook_url: None,
            result: None,
            error: None,
            error_kind: None,
            updated_at: chrono::Utc::now(),
        }
    }

    /// State store key for this job.
    pub fn store_key(&self) -> String {
        store_key(&self.id)
    }

    /// Move to `state`, replacing the detail message and bumping `updated_at`.
    pub fn transition(&mut self, state: JobState, message: Option<String>) {
        self.state = state;
        self.message = message;
        self.updated_at = chrono::Utc::now();
    }
}

/// State store key for a job id.
pub fn store_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Request-scoped context handed to every component call.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
}

impl JobContext {
    /// Use the caller-supplied id, or generate a UUID v4 when absent or blank.
    pub fn new(job_id: Option<String>) -> Self {
        let job_id = job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self { job_id }
    }
}
