//! Error types for incidentflow.
//!
//! The taxonomy mirrors how failures propagate through the job core:
//! unknown ids and illegal record transitions surface synchronously to the
//! caller, stage failures become terminal job state, and observer overruns
//! only ever affect the observer that fell behind.

use crate::core::JobId;
use std::collections::HashMap;
use thiserror::Error;

/// Convenience result alias used across the crate.
pub type Result<T, E = IncidentflowError> = std::result::Result<T, E>;

/// The main error type for incidentflow operations.
#[derive(Debug, Error)]
pub enum IncidentflowError {
    /// The job identifier is unknown.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A job record transition violated the lifecycle state machine.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// A stage reported failure.
    #[error("{0}")]
    StageFailure(#[from] StageFailureError),

    /// An observer fell behind and was disconnected.
    #[error("{0}")]
    BufferOverrun(#[from] BufferOverrunError),

    /// The job's progress channel already delivered its terminal event.
    #[error("Progress channel for job {0} is closed")]
    ChannelClosed(JobId),

    /// Artifact storage or lookup failed.
    #[error("{0}")]
    Artifact(#[from] ArtifactError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A submission was rejected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IncidentflowError {
    /// Short machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::StageFailure(_) => "STAGE_FAILURE",
            Self::BufferOverrun(_) => "BUFFER_OVERRUN",
            Self::ChannelClosed(_) => "CHANNEL_CLOSED",
            Self::Artifact(ArtifactError::NotFound { .. }) => "ARTIFACT_NOT_FOUND",
            Self::Artifact(ArtifactError::InvalidPath { .. }) => "INVALID_ARTIFACT_PATH",
            Self::Artifact(_) => "ARTIFACT_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error raised when a job record transition is not allowed.
#[derive(Debug, Clone, Error)]
#[error("Invalid transition for job {job_id}: cannot {attempted} while {from} ({reason})")]
pub struct InvalidTransitionError {
    /// The job whose record was being updated.
    pub job_id: JobId,
    /// The status the record was in.
    pub from: String,
    /// The transition that was attempted.
    pub attempted: String,
    /// Why the transition was rejected.
    pub reason: String,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(
        job_id: JobId,
        from: impl Into<String>,
        attempted: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            from: from.into(),
            attempted: attempted.into(),
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("job_id".to_string(), serde_json::json!(self.job_id));
        map.insert("from".to_string(), serde_json::json!(self.from));
        map.insert("attempted".to_string(), serde_json::json!(self.attempted));
        map.insert("reason".to_string(), serde_json::json!(self.reason));
        map
    }
}

/// The error a stage reports from `execute`.
///
/// Stages do not know where they sit in a pipeline; the runner attaches
/// that identity when it turns this into a [`StageFailureError`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    /// Human-readable cause.
    pub message: String,
    /// Whether a stage-local retry policy may try again.
    pub retryable: bool,
}

impl StageError {
    /// Creates a permanent stage error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a transient stage error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Invalid stage payload: {err}"))
    }
}

/// A stage failure with the identity of the failing stage attached.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' (#{index}) failed: {message}")]
pub struct StageFailureError {
    /// Name of the failing stage.
    pub stage: String,
    /// Position of the failing stage in the pipeline.
    pub index: usize,
    /// The reported cause.
    pub message: String,
}

impl StageFailureError {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, index: usize, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            index,
            message: message.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("index".to_string(), serde_json::json!(self.index));
        map.insert("error".to_string(), serde_json::json!(self.message));
        map
    }
}

/// Raised to an observer whose backlog exceeded the bus bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Observer {observer_id} of job {job_id} fell more than {backlog} events behind and was disconnected")]
pub struct BufferOverrunError {
    /// The observed job.
    pub job_id: JobId,
    /// The disconnected observer.
    pub observer_id: u64,
    /// The configured per-observer bound.
    pub backlog: usize,
}

/// Errors related to artifact storage.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No artifact exists at the given reference.
    #[error("Artifact not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// The reference escapes the job's artifact root or is malformed.
    #[error("Invalid artifact path: {path}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// Underlying storage failure.
    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an invalid-path error.
    #[must_use]
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_to_dict() {
        let job_id = JobId::new();
        let err = InvalidTransitionError::new(job_id, "completed", "start", "job is terminal");

        let dict = err.to_dict();
        assert_eq!(dict.get("from").unwrap(), "completed");
        assert_eq!(dict.get("attempted").unwrap(), "start");
        assert!(err.to_string().contains("job is terminal"));
    }

    #[test]
    fn test_stage_failure_display() {
        let err = StageFailureError::new("deescalation", 1, "model quota exhausted");
        assert_eq!(
            err.to_string(),
            "Stage 'deescalation' (#1) failed: model quota exhausted"
        );
        assert_eq!(err.to_dict().get("index").unwrap(), 1);
    }

    #[test]
    fn test_stage_error_retryable() {
        assert!(StageError::retryable("timeout").retryable);
        assert!(!StageError::new("bad input").retryable);
    }

    #[test]
    fn test_error_codes() {
        let job_id = JobId::new();
        assert_eq!(IncidentflowError::NotFound(job_id).code(), "NOT_FOUND");
        assert_eq!(
            IncidentflowError::from(ArtifactError::not_found("a.txt")).code(),
            "ARTIFACT_NOT_FOUND"
        );
        assert_eq!(
            IncidentflowError::from(BufferOverrunError {
                job_id,
                observer_id: 3,
                backlog: 8,
            })
            .code(),
            "BUFFER_OVERRUN"
        );
    }
}
