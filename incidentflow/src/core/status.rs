//! Job lifecycle status and stage kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of analysis a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Scans the submitted media for incidents.
    Perception,
    /// Produces per-incident safety guidance.
    Deescalation,
    /// Compiles the post-incident report.
    Report,
}

impl StageKind {
    /// All kinds in pipeline order.
    pub const ALL: [Self; 3] = [Self::Perception, Self::Deescalation, Self::Report];

    /// Default stage name for this kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Perception => "perception",
            Self::Deescalation => "deescalation",
            Self::Report => "report",
        }
    }

    /// The message carried by the `step_start` event.
    #[must_use]
    pub fn start_message(&self) -> &'static str {
        match self {
            Self::Perception => "Analyzing video for road rage incidents...",
            Self::Deescalation => "Generating real-time safety guidance...",
            Self::Report => "Generating comprehensive incident report...",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown stage kind: {s}"))
    }
}

/// The lifecycle status of a job.
///
/// `Queued -> Running -> StageComplete(i)* -> Complete`, or `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by a runner.
    Queued,
    /// A runner owns the job and a stage may be in flight.
    Running,
    /// The stage at `index` finished successfully.
    StageComplete {
        /// Position of the completed stage.
        index: usize,
        /// Name of the completed stage.
        stage: String,
    },
    /// Every stage succeeded.
    #[serde(rename = "completed")]
    Complete,
    /// A stage failed; no further stage will run.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl JobStatus {
    /// Returns true once the status can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Short label used in status payloads and listings.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::StageComplete { .. } => "stage_complete",
            Self::Complete => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageComplete { index, stage } => write!(f, "stage_complete({index}:{stage})"),
            other => f.write_str(other.label()),
        }
    }
}
