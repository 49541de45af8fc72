//! Readiness probe for the ComfyUI HTTP API.
//!
//! The worker starts alongside ComfyUI, so the first job usually arrives
//! before the server is listening. [`probe`] polls `GET /` until it answers
//! with HTTP 200 or the attempts run out. Transport errors count as
//! "not ready yet", never as failures.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::retry::{retry, RetryOutcome, RetryPolicy, Step};

/// Result of a readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Every attempt failed.
    Unavailable { attempts: u32 },
    /// Stopped early by cancellation or the job deadline.
    Interrupted { attempts: u32 },
}

/// Probe the server up to `max_attempts` times, `interval` apart.
///
/// Returns `true` on the first HTTP 200.
pub async fn probe(api: &ComfyUIApi, max_attempts: u32, interval: Duration) -> bool {
    probe_with_policy(
        api,
        &RetryPolicy::fixed(max_attempts, interval),
        &CancellationToken::new(),
        None,
    )
    .await
        == Readiness::Ready
}

/// [`probe`] with an explicit policy, cancellation token and deadline.
pub async fn probe_with_policy(
    api: &ComfyUIApi,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Readiness {
    let outcome: RetryOutcome<(), ()> = retry(policy, cancel, deadline, |attempt| async move {
        match api.ping().await {
            Ok(()) => Step::Done(()),
            Err(e) => {
                tracing::debug!(
                    url = api.api_url(),
                    attempt,
                    error = %e,
                    "ComfyUI not reachable yet",
                );
                Step::Retry
            }
        }
    })
    .await;

    match outcome {
        RetryOutcome::Done { attempts, .. } => {
            tracing::info!(url = api.api_url(), attempts, "ComfyUI API is reachable");
            Readiness::Ready
        }
        RetryOutcome::Exhausted { attempts } | RetryOutcome::Aborted { attempts, .. } => {
            tracing::warn!(
                url = api.api_url(),
                attempts,
                "Failed to connect to ComfyUI API",
            );
            Readiness::Unavailable { attempts }
        }
        RetryOutcome::Cancelled { attempts } | RetryOutcome::DeadlineExceeded { attempts } => {
            tracing::info!(url = api.api_url(), attempts, "Readiness probe interrupted");
            Readiness::Interrupted { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn server_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert!(probe(&api, 1, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn ready_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert!(probe(&api, 5, Duration::from_millis(5)).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn never_ready_uses_every_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert!(!probe(&api, 4, Duration::from_millis(1)).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn other_success_codes_are_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert!(!probe(&api, 2, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn cancelled_probe_is_interrupted() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let api = ComfyUIApi::new("http://127.0.0.1:9");

        let readiness = probe_with_policy(
            &api,
            &RetryPolicy::fixed(50, Duration::from_millis(10)),
            &cancel,
            None,
        )
        .await;
        assert!(matches!(readiness, Readiness::Interrupted { .. }));
    }

    #[tokio::test]
    async fn exhausted_probe_is_unavailable() {
        let api = ComfyUIApi::new("http://127.0.0.1:9");
        let readiness = probe_with_policy(
            &api,
            &RetryPolicy::fixed(2, Duration::from_millis(1)),
            &CancellationToken::new(),
            None,
        )
        .await;
        assert_eq!(readiness, Readiness::Unavailable { attempts: 2 });
    }

    #[tokio::test]
    async fn server_down() {
        // Nothing listens on port 9 locally; every attempt is a transport error.
        let api = ComfyUIApi::new("http://127.0.0.1:9");
        assert!(!probe(&api, 2, Duration::from_millis(1)).await);
    }
}
