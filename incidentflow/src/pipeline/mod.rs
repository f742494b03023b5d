//! Pipeline execution.
//!
//! [`PipelineRunner`] owns the `Queued -> Running -> StageComplete(i)* ->
//! Complete | Failed` state machine for a job.

mod runner;

pub use runner::PipelineRunner;
