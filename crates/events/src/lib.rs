//! Job status reporting.
//!
//! Two independent, best-effort sinks:
//!
//! - [`StateStore`]: key-value persistence of job snapshots under
//!   `job:{id}`, backed by Redis ([`RedisStateStore`]) or memory
//!   ([`MemoryStateStore`]).
//! - [`WebhookDelivery`]: final status notification to a caller URL.
//!
//! [`JobReporter`] combines both and never propagates their failures.

pub mod reporter;
pub mod store;
pub mod webhook;

pub use reporter::JobReporter;
pub use store::{MemoryStateStore, RedisStateStore, StateStore, StateStoreError};
pub use webhook::{WebhookDelivery, WebhookError, WebhookOutcome, WebhookPayload};
