//! Best-effort job status reporting.

use std::sync::Arc;
use std::time::Duration;

use relay_core::job::{Job, JobState};

use crate::store::{StateStore, StateStoreError};

/// How long a snapshot write may take before it is counted as failed.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
use crate::webhook::{WebhookDelivery, WebhookOutcome, WebhookPayload};

/// Persists job state transitions and sends the final webhook.
///
/// Neither sink can fail a job: store errors are logged and counted,
/// webhook errors are returned as a [`WebhookOutcome`].
#[derive(Clone)]
pub struct JobReporter {
    store: Arc<dyn StateStore>,
    webhook: WebhookDelivery,
    store_timeout: Duration,
}

impl JobReporter {
    pub fn new(store: Arc<dyn StateStore>, webhook: WebhookDelivery) -> Self {
        Self {
            store,
            webhook,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound each snapshot write, whatever the store does internally.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Move `job` to `state` and persist the snapshot.
    ///
    /// Returns `false` if the snapshot write failed.
    pub async fn transition(&self, job: &mut Job, state: JobState, message: Option<String>) -> bool {
        job.transition(state, message);
        self.persist(job).await
    }

    /// Persist the current snapshot of `job` under `job:{id}`.
    pub async fn persist(&self, job: &Job) -> bool {
        let snapshot = match serde_json::to_value(job) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to serialize job snapshot");
                return false;
            }
        };

        let key = job.store_key();
        let write = self.store.put(&key, &snapshot);
        let result = match tokio::time::timeout(self.store_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StateStoreError::Timeout(self.store_timeout)),
        };
        match result {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, state = %job.state, "Job state persisted");
                true
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    state = %job.state,
                    error = %e,
                    "Failed to persist job state",
                );
                false
            }
        }
    }

    /// Send the final webhook when the job carries a URL.
    pub async fn notify(&self, url: Option<&str>, payload: &WebhookPayload) -> Option<WebhookOutcome> {
        let url = url?;
        Some(self.webhook.deliver(url, payload).await)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryStateStore;

    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn put(&self, _key: &str, _value: &serde_json::Value) -> Result<(), StateStoreError> {
            Err(StateStoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }
    }

    #[tokio::test]
    async fn transition_persists_snapshot() {
        let store = Arc::new(MemoryStateStore::new());
        let reporter = JobReporter::new(store.clone(), WebhookDelivery::new());
        let mut job = Job::new("job-1");

        assert!(reporter.transition(&mut job, JobState::InQueue, None).await);

        let snapshot = store.get("job:job-1").await.unwrap();
        assert_eq!(snapshot["state"], "IN_QUEUE");
        assert_eq!(snapshot["id"], "job-1");
    }

    #[tokio::test]
    async fn store_failure_is_not_fatal() {
        let reporter = JobReporter::new(Arc::new(BrokenStore), WebhookDelivery::new());
        let mut job = Job::new("job-1");

        assert!(!reporter.transition(&mut job, JobState::Failed, Some("boom".into())).await);
        assert_eq!(job.state, JobState::Failed);
    }

    struct SilentStore;

    #[async_trait]
    impl StateStore for SilentStore {
        async fn put(&self, _key: &str, _value: &serde_json::Value) -> Result<(), StateStoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn silent_store_write_times_out() {
        let reporter = JobReporter::new(Arc::new(SilentStore), WebhookDelivery::new())
            .with_store_timeout(Duration::from_millis(20));
        let mut job = Job::new("job-1");

        assert!(!reporter.transition(&mut job, JobState::InQueue, None).await);
        assert_eq!(job.state, JobState::InQueue);
    }

    #[tokio::test]
    async fn notify_skips_without_url() {
        let reporter = JobReporter::new(Arc::new(MemoryStateStore::new()), WebhookDelivery::new());
        let payload = WebhookPayload {
            job_id: "job-1".into(),
            status: "FAILED".into(),
            timestamp: chrono::Utc::now(),
            result: None,
            error: Some("boom".into()),
            error_kind: Some("submission_error".into()),
            duration_ms: 10,
            images_count: 0,
            loras_count: 0,
        };
        assert!(reporter.notify(None, &payload).await.is_none());
    }
}
