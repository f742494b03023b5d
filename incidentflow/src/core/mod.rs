//! Core domain model types for incidentflow.
//!
//! This module contains the fundamental types shared by the job store,
//! the progress bus and the pipeline runner:
//! - Job identifiers and lifecycle status
//! - Progress events and their kinds
//! - Stage outputs and artifact references

mod artifact;
mod event;
mod job_id;
mod output;
mod status;

pub use artifact::{guess_media_type, ArtifactRef};
pub use event::{EventKind, ProgressEvent};
pub use job_id::JobId;
pub use output::{StageOutput, StageResult};
pub use status::{JobStatus, StageKind};
