//! Bounded retry loop with cancellation and an optional deadline.
//!
//! [`retry`] runs an attempt closure up to [`RetryPolicy::max_attempts`]
//! times, sleeping between attempts. The loop stops early when the closure
//! reports success or a fatal error, when the [`CancellationToken`] is
//! triggered, or when the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for a retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 means none are made).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub interval: Duration,
    /// Factor by which the delay grows after each failure (1.0 = fixed).
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Fixed-interval policy.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            multiplier: 1.0,
            max_interval: interval,
        }
    }
}

/// Calculate the next delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_interval`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_interval)
}

/// What a single attempt decided.
#[derive(Debug)]
pub enum Step<T, E> {
    /// Success, stop retrying.
    Done(T),
    /// Not ready yet, try again after the delay.
    Retry,
    /// Fatal error, stop retrying.
    Abort(E),
}

/// How a retry loop ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Done { value: T, attempts: u32 },
    Aborted { error: E, attempts: u32 },
    /// Every attempt returned [`Step::Retry`].
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
    DeadlineExceeded { attempts: u32 },
}

/// Run `attempt` until it succeeds, aborts, or the policy runs out.
///
/// `attempt` receives the 1-based attempt number. No delay follows the
/// final attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    mut attempt: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Step<T, E>>,
{
    let mut delay = policy.interval;

    for n in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: n - 1 };
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return RetryOutcome::DeadlineExceeded { attempts: n - 1 };
        }

        let step = tokio::select! {
            _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: n },
            _ = sleep_until_deadline(deadline) => {
                return RetryOutcome::DeadlineExceeded { attempts: n };
            }
            step = attempt(n) => step,
        };

        match step {
            Step::Done(value) => return RetryOutcome::Done { value, attempts: n },
            Step::Abort(error) => return RetryOutcome::Aborted { error, attempts: n },
            Step::Retry if n == policy.max_attempts => break,
            Step::Retry => {}
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: n },
            _ = sleep_until_deadline(deadline) => {
                return RetryOutcome::DeadlineExceeded { attempts: n };
            }
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, policy);
    }

    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn fixed_policy_keeps_interval() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(250));
        assert_eq!(
            next_delay(Duration::from_millis(250), &policy),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        };
        let mut delay = policy.interval;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &policy);
        }
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let outcome: RetryOutcome<u32, ()> =
            retry(&fast(5), &CancellationToken::new(), None, |n| async move {
                if n == 3 {
                    Step::Done(n)
                } else {
                    Step::Retry
                }
            })
            .await;
        assert_matches!(outcome, RetryOutcome::Done { value: 3, attempts: 3 });
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let mut calls = 0;
        let outcome: RetryOutcome<(), ()> =
            retry(&fast(4), &CancellationToken::new(), None, |_| {
                calls += 1;
                async { Step::Retry }
            })
            .await;
        assert_matches!(outcome, RetryOutcome::Exhausted { attempts: 4 });
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn abort_stops_immediately() {
        let outcome: RetryOutcome<(), &str> =
            retry(&fast(10), &CancellationToken::new(), None, |_| async {
                Step::Abort("boom")
            })
            .await;
        assert_matches!(outcome, RetryOutcome::Aborted { error: "boom", attempts: 1 });
    }

    #[tokio::test]
    async fn zero_attempts_is_exhausted() {
        let outcome: RetryOutcome<(), ()> =
            retry(&fast(0), &CancellationToken::new(), None, |_| async { Step::Retry }).await;
        assert_matches!(outcome, RetryOutcome::Exhausted { attempts: 0 });
    }

    #[tokio::test]
    async fn cancellation_token_stops_loop() {
        let cancel = CancellationToken::new();
        // Cancel immediately: no attempt should run.
        cancel.cancel();

        let outcome: RetryOutcome<(), ()> =
            retry(&fast(10), &cancel, None, |_| async { Step::Retry }).await;
        assert_matches!(outcome, RetryOutcome::Cancelled { attempts: 0 });
    }

    #[tokio::test]
    async fn deadline_cuts_loop_short() {
        let policy = RetryPolicy::fixed(1_000, Duration::from_millis(20));
        let deadline = Instant::now() + Duration::from_millis(50);

        let outcome: RetryOutcome<(), ()> =
            retry(&policy, &CancellationToken::new(), Some(deadline), |_| async {
                Step::Retry
            })
            .await;
        assert_matches!(outcome, RetryOutcome::DeadlineExceeded { attempts } if attempts < 1_000);
    }
}
