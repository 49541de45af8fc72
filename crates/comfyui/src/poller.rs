//! Workflow submission and history polling.
//!
//! [`GenerationRunner::submit`] queues a workflow and returns its prompt id.
//! [`GenerationRunner::wait_for_outputs`] then polls `GET /history/{id}` on a
//! fixed interval until the record carries a non-empty outputs map.
//!
//! Loop exhaustion ([`JobError::PollTimeout`]) and a transport failure while
//! polling ([`JobError::PollError`]) are reported as distinct errors.

use relay_core::error::JobError;
use relay_core::job::JobContext;
use relay_core::outputs::has_outputs;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::retry::{retry, RetryOutcome, RetryPolicy, Step};

/// Drives one workflow through a ComfyUI instance.
pub struct GenerationRunner<'a> {
    api: &'a ComfyUIApi,
    policy: RetryPolicy,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl<'a> GenerationRunner<'a> {
    pub fn new(api: &'a ComfyUIApi, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Stop polling when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stop polling once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Queue `workflow` and return the prompt id.
    pub async fn submit(&self, ctx: &JobContext, workflow: &Value) -> Result<String, JobError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .api
            .submit_workflow(workflow, &client_id)
            .await
            .map_err(|e| JobError::Submission(e.to_string()))?;

        tracing::info!(
            job_id = %ctx.job_id,
            prompt_id = %response.prompt_id,
            queue_position = ?response.number,
            "Workflow queued on ComfyUI",
        );
        Ok(response.prompt_id)
    }

    /// Poll history for `prompt_id` and return its outputs map.
    pub async fn wait_for_outputs(
        &self,
        ctx: &JobContext,
        prompt_id: &str,
    ) -> Result<Value, JobError> {
        tracing::info!(
            job_id = %ctx.job_id,
            prompt_id,
            max_attempts = self.policy.max_attempts,
            interval_ms = self.policy.interval.as_millis() as u64,
            "Waiting for image generation",
        );

        let api = self.api;
        let outcome = retry(&self.policy, &self.cancel, self.deadline, |attempt| async move {
            match api.get_history(prompt_id).await {
                Ok(history) => match finished_outputs(&history, prompt_id) {
                    Some(outputs) => Step::Done(outputs),
                    None => {
                        tracing::trace!(prompt_id, attempt, "Generation still running");
                        Step::Retry
                    }
                },
                Err(e) => Step::Abort(e),
            }
        })
        .await;

        match outcome {
            RetryOutcome::Done { value, attempts } => {
                tracing::info!(job_id = %ctx.job_id, prompt_id, attempts, "Generation finished");
                Ok(value)
            }
            RetryOutcome::Exhausted { attempts } => {
                tracing::error!(job_id = %ctx.job_id, prompt_id, attempts, "Max poll attempts reached");
                Err(JobError::PollTimeout { attempts })
            }
            RetryOutcome::Aborted { error, attempts } => {
                tracing::error!(
                    job_id = %ctx.job_id,
                    prompt_id,
                    attempts,
                    error = %error,
                    "Polling history failed",
                );
                Err(JobError::PollError(error.to_string()))
            }
            RetryOutcome::Cancelled { .. } | RetryOutcome::DeadlineExceeded { .. } => {
                tracing::warn!(job_id = %ctx.job_id, prompt_id, "Polling stopped before completion");
                Err(JobError::Cancelled)
            }
        }
    }
}

/// Outputs of `prompt_id` if its history record exists and is non-empty.
fn finished_outputs(history: &Value, prompt_id: &str) -> Option<Value> {
    let outputs = history.get(prompt_id)?.get("outputs")?;
    has_outputs(outputs).then(|| outputs.clone())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use assert_matches::assert_matches;
    use relay_core::error::POLL_TIMEOUT_MESSAGE;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> JobContext {
        JobContext::new(Some("job-1".into()))
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn finished_outputs_requires_record_and_outputs() {
        assert!(finished_outputs(&json!({}), "p").is_none());
        assert!(finished_outputs(&json!({"p": {"status": {}}}), "p").is_none());
        assert!(finished_outputs(&json!({"p": {"outputs": {}}}), "p").is_none());
        assert_eq!(
            finished_outputs(&json!({"p": {"outputs": {"9": {"images": []}}}}), "p"),
            Some(json!({"9": {"images": []}}))
        );
    }

    #[tokio::test]
    async fn submit_failure_is_submission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let runner = GenerationRunner::new(&api, fast(3));
        let err = runner.submit(&ctx(), &json!({})).await.unwrap_err();
        assert_matches!(err, JobError::Submission(_));
    }

    #[tokio::test]
    async fn submit_rejects_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let runner = GenerationRunner::new(&api, fast(3));
        assert_matches!(
            runner.submit(&ctx(), &json!({})).await,
            Err(JobError::Submission(_))
        );
    }

    #[tokio::test]
    async fn outputs_returned_once_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "p1": {"outputs": {"9": {"images": [{"filename": "a.png", "subfolder": ""}]}}}
            })))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let runner = GenerationRunner::new(&api, fast(10));
        let outputs = runner.wait_for_outputs(&ctx(), "p1").await.unwrap();
        assert_eq!(outputs["9"]["images"][0]["filename"], "a.png");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_poll_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"p1": {"status": {}}})))
            .expect(5)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let runner = GenerationRunner::new(&api, fast(5));
        let err = runner.wait_for_outputs(&ctx(), "p1").await.unwrap_err();
        assert_matches!(err, JobError::PollTimeout { attempts: 5 });
        assert_eq!(err.to_string(), POLL_TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn transport_failure_is_poll_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/p1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let runner = GenerationRunner::new(&api, fast(5));
        assert_matches!(
            runner.wait_for_outputs(&ctx(), "p1").await,
            Err(JobError::PollError(_))
        );
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let api = ComfyUIApi::new("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let runner = GenerationRunner::new(&api, fast(5)).with_cancellation(cancel);
        assert_matches!(
            runner.wait_for_outputs(&ctx(), "p1").await,
            Err(JobError::Cancelled)
        );
    }
}
