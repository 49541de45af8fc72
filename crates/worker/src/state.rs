use std::sync::Arc;

use relay_pipeline::JobRunner;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    /// Single permit: jobs are processed one at a time.
    pub gate: Arc<Semaphore>,
    /// Cancelled on shutdown to stop in-flight retry loops.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(runner: JobRunner, shutdown: CancellationToken) -> Self {
        Self {
            runner: Arc::new(runner),
            gate: Arc::new(Semaphore::new(1)),
            shutdown,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.available_permits() == 0
    }
}
