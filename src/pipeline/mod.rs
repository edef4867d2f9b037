// Batch pipeline: processing steps, stage results, datalake storage and the runner

pub mod orchestrator;
pub mod processing;
pub mod results;
pub mod storage;

pub use orchestrator::{Orchestrator, PipelineAdapters, RunSummary, Stage, Trigger};
