//! # Incidentflow
//!
//! Job lifecycle management and live progress streaming for multi-stage
//! incident analysis.
//!
//! A submitted job runs an ordered sequence of opaque stages (perception,
//! de-escalation guidance, report compilation) on a background task while
//! any number of observers follow its progress:
//!
//! - **Job store**: concurrency-safe records with an enforced lifecycle
//! - **Progress bus**: per-job ordered event log with replay and bounded fan-out
//! - **Pipeline runner**: fail-fast stage execution, store updated before publish
//! - **HTTP surface**: submit, status, results, artifacts and an SSE stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use incidentflow::prelude::*;
//!
//! let store = Arc::new(JobStore::new());
//! let bus = Arc::new(ProgressBus::new(BusConfig::default()));
//! let runner = PipelineRunner::new(stages, store, bus)?;
//! let service = JobService::new(Arc::new(runner));
//!
//! let job_id = service.submit(Submission::new("dashcam.mp4"))?;
//! let mut observer = service.attach(job_id)?;
//! while let Some(event) = observer.recv().await {
//!     println!("{}", event?.kind);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod stages;
pub mod testing;
pub mod utils;

pub use errors::{IncidentflowError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    pub use crate::core::{
        ArtifactRef, EventKind, JobId, JobStatus, ProgressEvent, StageKind, StageOutput,
        StageResult,
    };
    pub use crate::errors::{
        BufferOverrunError, IncidentflowError, InvalidTransitionError, StageError,
        StageFailureError,
    };
    pub use crate::events::{BusConfig, EventSink, LoggingEventSink, Observer, ProgressBus};
    pub use crate::jobs::{JobRecord, JobStore, Submission};
    pub use crate::pipeline::PipelineRunner;
    pub use crate::service::JobService;
    pub use crate::stages::{CommandStage, RetryConfig, RetryingStage, Stage, StageContext};
    pub use crate::utils::{iso_timestamp, Timestamp};
    pub use std::sync::Arc;
}
