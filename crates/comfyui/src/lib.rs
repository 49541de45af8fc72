//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, a bounded retry loop with cancellation,
//! the readiness probe, the submit-then-poll engine used to drive a
//! workflow through a local ComfyUI server, and LoRA search-path checks.

pub mod api;
pub mod models;
pub mod poller;
pub mod readiness;
pub mod retry;
