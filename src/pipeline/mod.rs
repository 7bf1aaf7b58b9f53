// file: src/pipeline/mod.rs
// description: pipeline module exports and public api
// reference: pipeline orchestration

pub mod orchestrator;
pub mod progress;
pub mod registry;

pub use orchestrator::{PipelineOrchestrator, PipelineStages, RunOptions};
pub use progress::{BatchProgress, BatchStats, TaskProgress};
pub use registry::TaskRegistry;
