//! Domain logic for the generation job relay.
//!
//! Pure building blocks shared by the pipeline and worker crates: the job
//! record and its states, the job error taxonomy, payload validation,
//! auxiliary asset naming and protection, the workflow graph patcher, and
//! output descriptor flattening. Nothing in this crate performs network I/O.

pub mod assets;
pub mod error;
pub mod job;
pub mod outputs;
pub mod types;
pub mod validation;
pub mod workflow;
