//! Progress events recorded for a job.

use super::JobId;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

const COMPLETE_SUFFIX: &str = "_complete";
const PROGRESS_SUFFIX: &str = "_progress";

/// The kind of a progress event.
///
/// Stage-specific kinds carry the stage name; on the wire they become
/// `<stage>_complete` and `<stage>_progress`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventKind {
    /// First event of every job; replayed to every observer.
    Connected,
    /// The job's lifecycle status changed.
    Status,
    /// A stage is about to execute.
    StepStart,
    /// Intermediate progress reported by a running stage.
    StageProgress(String),
    /// A stage finished successfully.
    StepComplete(String),
    /// A non-fatal problem reported by a stage.
    Warning,
    /// The job failed.
    Error,
    /// Every stage succeeded; carries the elapsed time.
    Complete,
    /// Terminal event; nothing follows it.
    Done,
}

impl EventKind {
    /// The `type` string used on the wire.
    #[must_use]
    pub fn wire_type(&self) -> Cow<'static, str> {
        match self {
            Self::Connected => Cow::Borrowed("connected"),
            Self::Status => Cow::Borrowed("status"),
            Self::StepStart => Cow::Borrowed("step_start"),
            Self::StageProgress(stage) => Cow::Owned(format!("{stage}{PROGRESS_SUFFIX}")),
            Self::StepComplete(stage) => Cow::Owned(format!("{stage}{COMPLETE_SUFFIX}")),
            Self::Warning => Cow::Borrowed("warning"),
            Self::Error => Cow::Borrowed("error"),
            Self::Complete => Cow::Borrowed("complete"),
            Self::Done => Cow::Borrowed("done"),
        }
    }

    /// Returns true for the terminal `done` kind.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_type())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "connected" => Self::Connected,
            "status" => Self::Status,
            "step_start" => Self::StepStart,
            "warning" => Self::Warning,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "done" => Self::Done,
            other => {
                if let Some(stage) = other.strip_suffix(COMPLETE_SUFFIX).filter(|s| !s.is_empty()) {
                    Self::StepComplete(stage.to_string())
                } else if let Some(stage) =
                    other.strip_suffix(PROGRESS_SUFFIX).filter(|s| !s.is_empty())
                {
                    Self::StageProgress(stage.to_string())
                } else {
                    return Err(format!("Unknown event type: {other}"));
                }
            }
        };
        Ok(kind)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.wire_type().into_owned()
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// One entry of a job's progress log.
///
/// Immutable once appended; `sequence_number` is gap-free per job and
/// starts at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The job this event belongs to.
    pub job_id: JobId,
    /// Position in the job's log.
    pub sequence_number: u64,
    /// What happened.
    pub kind: EventKind,
    /// Kind-specific data.
    pub payload: serde_json::Value,
    /// When the event was appended.
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(job_id: JobId, sequence_number: u64, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            sequence_number,
            kind,
            payload,
            timestamp: crate::utils::now_utc(),
        }
    }

    /// Returns true if this is the terminal `done` event.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.kind.is_done()
    }
}
