//! Job-level error taxonomy.
//!
//! Every failure a job can run into maps onto one [`JobError`] variant.
//! Fatal variants end the job in `FAILED`; the others are recorded next
//! to the primary outcome and never replace it.

/// Message reported when the poll loop runs out of attempts.
pub const POLL_TIMEOUT_MESSAGE: &str = "Max retries reached while waiting for image generation";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// Malformed input payload. Displays the fixed validator message verbatim.
    #[error("{0}")]
    Validation(String),

    /// The generation server never answered the readiness probe.
    #[error("ComfyUI API unavailable at {url} after {attempts} attempts")]
    DependencyUnavailable { url: String, attempts: u32 },

    /// One or more inline images could not be uploaded.
    #[error("Failed to upload images: {}", .0.join("; "))]
    Upload(Vec<String>),

    /// A single auxiliary asset could not be downloaded.
    #[error("Failed to download {reference}: {message}")]
    Download { reference: String, message: String },

    /// Queuing the workflow failed.
    #[error("Error queuing workflow: {0}")]
    Submission(String),

    /// The poll loop was exhausted without outputs.
    #[error("{POLL_TIMEOUT_MESSAGE}")]
    PollTimeout { attempts: u32 },

    /// A transport failure while polling for results.
    #[error("Error waiting for image generation: {0}")]
    PollError(String),

    /// The poll loop was cut short by the job deadline or a cancellation.
    #[error("Job cancelled while waiting for image generation")]
    Cancelled,

    /// A produced image was not found on disk.
    #[error("Output image does not exist: {0}")]
    OutputMissing(String),

    /// Cleanup of staged assets partially failed.
    #[error("Cleanup finished with errors: {}", .0.join("; "))]
    CleanupWarning(Vec<String>),

    /// The webhook could not be notified.
    #[error("Webhook delivery failed: {0}")]
    Webhook(String),
}

impl JobError {
    /// Stable snake_case classification reported next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation_error",
            JobError::DependencyUnavailable { .. } => "dependency_unavailable",
            JobError::Upload(_) => "upload_error",
            JobError::Download { .. } => "download_error",
            JobError::Submission(_) => "submission_error",
            JobError::PollTimeout { .. } => "poll_timeout",
            JobError::PollError(_) => "poll_error",
            JobError::Cancelled => "cancelled",
            JobError::OutputMissing(_) => "output_missing",
            JobError::CleanupWarning(_) => "cleanup_warning",
            JobError::Webhook(_) => "webhook_error",
        }
    }

    /// Whether this error ends the job in `FAILED`.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            JobError::Download { .. }
                | JobError::OutputMissing(_)
                | JobError::CleanupWarning(_)
                | JobError::Webhook(_)
        )
    }
}
