//! Job pipeline: asset staging, cleanup, output collection and the
//! orchestrator that sequences them around a ComfyUI run.

pub mod cleanup;
pub mod collector;
pub mod outcome;
pub mod runner;
pub mod staging;

pub use cleanup::{CleanupManager, CleanupReport};
pub use collector::{OutputCollector, OutputImage, OutputReport};
pub use outcome::{JobOutcome, ReportStatus, SideEffects};
pub use runner::{JobRunner, RunnerSettings};
pub use staging::{LoraStager, Verification};
