//! Job records and the store that owns them.
//!
//! This module provides:
//! - `JobRecord` - the in-process state of one job
//! - `JobTransition` - the mutations a runner may apply
//! - `JobStore` - concurrency-safe create/read/update keyed by `JobId`

mod record;
mod store;

pub use record::{JobError, JobRecord, JobSummary, JobTransition, Submission, VOICE_OPTION};
pub use store::JobStore;
