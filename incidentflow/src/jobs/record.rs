//! The in-process record of one job and its transition rules.

use crate::core::{JobId, JobStatus, StageOutput, StageResult};
use crate::errors::InvalidTransitionError;
use crate::utils::{monotonic_after, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Option key selecting the guidance voice.
pub const VOICE_OPTION: &str = "voice";

/// What a client submitted: the stage-0 input plus named options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Reference to the uploaded media (path or storage key).
    pub input: String,
    /// Named options such as the voice selector.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Submission {
    /// Creates a submission with no options.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            options: BTreeMap::new(),
        }
    }

    /// Sets an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Reads an option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// The selected guidance voice, if any.
    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.option(VOICE_OPTION)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Name of the failing stage, if a stage was involved.
    pub stage: Option<String>,
    /// Position of the failing stage.
    pub index: Option<usize>,
    /// Error description.
    pub message: String,
}

/// A mutation applied to a [`JobRecord`] by its runner.
#[derive(Debug, Clone)]
pub enum JobTransition {
    /// `Queued -> Running`; fixes the ordered stage plan.
    Start {
        /// Stage names in execution order.
        stages: Vec<String>,
    },
    /// Marks the stage at `index` as in flight.
    BeginStage {
        /// Position of the stage.
        index: usize,
    },
    /// Records the output of the in-flight stage.
    CompleteStage {
        /// Position of the stage.
        index: usize,
        /// What the stage produced.
        output: StageOutput,
        /// Execution time in milliseconds.
        duration_ms: f64,
    },
    /// Terminal failure.
    Fail {
        /// Position of the failing stage, if any.
        index: Option<usize>,
        /// Error description.
        message: String,
    },
    /// Terminal success after every planned stage completed.
    Complete,
}

impl JobTransition {
    /// Short name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::BeginStage { .. } => "begin_stage",
            Self::CompleteStage { .. } => "complete_stage",
            Self::Fail { .. } => "fail",
            Self::Complete => "complete",
        }
    }
}

/// The state of one job.
///
/// `stage_outputs` is append-only and never longer than `stage_plan`;
/// once `status` is terminal the record never changes again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Immutable identifier.
    pub id: JobId,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Name of the stage in flight.
    pub current_stage: Option<String>,
    /// Ordered stage names, fixed when the job starts.
    pub stage_plan: Vec<String>,
    /// Outputs of completed stages, in order.
    pub stage_outputs: Vec<StageResult>,
    /// Populated only when `status` is `Failed`.
    pub error: Option<JobError>,
    /// The submission that created the job.
    pub submission: Option<Submission>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time; never decreases.
    pub updated_at: Timestamp,
    /// When the job reached a terminal status.
    pub completed_at: Option<Timestamp>,
}

impl JobRecord {
    /// Creates a queued record.
    #[must_use]
    pub fn new(id: JobId, submission: Option<Submission>) -> Self {
        let now = now_utc();
        Self {
            id,
            status: JobStatus::Queued,
            current_stage: None,
            stage_plan: Vec::new(),
            stage_outputs: Vec::new(),
            error: None,
            submission,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true once the job is `Complete` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Looks up a completed stage's output by name.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<&StageResult> {
        self.stage_outputs.iter().find(|r| r.stage == stage)
    }

    /// Applies `transition`, or rejects it without modifying the record.
    pub fn apply(&mut self, transition: JobTransition) -> Result<(), InvalidTransitionError> {
        if self.is_terminal() {
            return Err(self.reject(&transition, "job is terminal"));
        }

        match transition {
            JobTransition::Start { stages } => {
                if self.status != JobStatus::Queued {
                    return Err(self.reject_named("start", "job already started"));
                }
                self.stage_plan = stages;
                self.status = JobStatus::Running;
            }
            JobTransition::BeginStage { index } => {
                self.require_started("begin_stage")?;
                if let Some(ref stage) = self.current_stage {
                    let reason = format!("stage '{stage}' is still in flight");
                    return Err(self.reject_named("begin_stage", reason));
                }
                if index != self.stage_outputs.len() {
                    let reason = format!(
                        "expected stage #{}, got #{index}",
                        self.stage_outputs.len()
                    );
                    return Err(self.reject_named("begin_stage", reason));
                }
                let Some(stage) = self.stage_plan.get(index).cloned() else {
                    let reason = format!("plan has only {} stages", self.stage_plan.len());
                    return Err(self.reject_named("begin_stage", reason));
                };
                self.status = JobStatus::Running;
                self.current_stage = Some(stage);
            }
            JobTransition::CompleteStage {
                index,
                output,
                duration_ms,
            } => {
                let Some(stage) = self.current_stage.clone() else {
                    return Err(self.reject_named("complete_stage", "no stage in flight"));
                };
                if index != self.stage_outputs.len() {
                    let reason = format!("stage '{stage}' is #{}, got #{index}", self.stage_outputs.len());
                    return Err(self.reject_named("complete_stage", reason));
                }
                self.stage_outputs.push(StageResult {
                    stage: stage.clone(),
                    index,
                    output,
                    duration_ms,
                    completed_at: now_utc(),
                });
                self.status = JobStatus::StageComplete { index, stage };
                self.current_stage = None;
            }
            JobTransition::Fail { index, message } => {
                let stage = index.and_then(|i| self.stage_plan.get(i).cloned());
                self.error = Some(JobError {
                    stage,
                    index,
                    message,
                });
                self.status = JobStatus::Failed;
                self.current_stage = None;
            }
            JobTransition::Complete => {
                self.require_started("complete")?;
                if self.current_stage.is_some() {
                    return Err(self.reject_named("complete", "a stage is still in flight"));
                }
                if self.stage_outputs.len() != self.stage_plan.len() {
                    let reason = format!(
                        "{} of {} stages completed",
                        self.stage_outputs.len(),
                        self.stage_plan.len()
                    );
                    return Err(self.reject_named("complete", reason));
                }
                self.status = JobStatus::Complete;
            }
        }

        let now = monotonic_after(self.updated_at, now_utc());
        self.updated_at = now;
        if self.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Condensed view for listings.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            status: self.status.label().to_string(),
            current_stage: self.current_stage.clone(),
            created_at: self.created_at,
            completed: self.is_terminal(),
        }
    }

    fn require_started(&self, attempted: &str) -> Result<(), InvalidTransitionError> {
        if self.status == JobStatus::Queued {
            return Err(self.reject_named(attempted, "job has not started"));
        }
        Ok(())
    }

    fn reject(&self, transition: &JobTransition, reason: &str) -> InvalidTransitionError {
        self.reject_named(transition.name(), reason)
    }

    fn reject_named(&self, attempted: &str, reason: impl Into<String>) -> InvalidTransitionError {
        InvalidTransitionError::new(self.id, self.status.label(), attempted, reason)
    }
}

/// One row of the job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job identifier.
    pub job_id: JobId,
    /// Status label.
    pub status: String,
    /// Stage in flight.
    pub current_stage: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Whether the job reached a terminal status.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(stages: &[&str]) -> JobRecord {
        let mut record = JobRecord::new(JobId::new(), None);
        record
            .apply(JobTransition::Start {
                stages: stages.iter().map(ToString::to_string).collect(),
            })
            .unwrap();
        record
    }

    fn run_stage(record: &mut JobRecord, index: usize) {
        record.apply(JobTransition::BeginStage { index }).unwrap();
        record
            .apply(JobTransition::CompleteStage {
                index,
                output: StageOutput::empty(),
                duration_ms: 1.0,
            })
            .unwrap();
    }

    #[test]
    fn test_new_record_is_queued() {
        let record = JobRecord::new(JobId::new(), Some(Submission::new("clip.mp4")));
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.current_stage.is_none());
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.submission.unwrap().input, "clip.mp4");
    }

    #[test]
    fn test_full_lifecycle() {
        let mut record = started(&["perception", "report"]);
        assert_eq!(record.status, JobStatus::Running);

        record.apply(JobTransition::BeginStage { index: 0 }).unwrap();
        assert_eq!(record.current_stage.as_deref(), Some("perception"));

        record
            .apply(JobTransition::CompleteStage {
                index: 0,
                output: StageOutput::new(serde_json::json!({"total_incidents": 1})),
                duration_ms: 12.0,
            })
            .unwrap();
        assert_eq!(
            record.status,
            JobStatus::StageComplete {
                index: 0,
                stage: "perception".into()
            }
        );
        assert!(record.current_stage.is_none());

        run_stage(&mut record, 1);
        record.apply(JobTransition::Complete).unwrap();

        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.stage_outputs.len(), 2);
        assert!(record.completed_at.is_some());
        assert!(record.updated_at >= record.created_at);
        assert!(record.output_of("perception").is_some());
    }

    #[test]
    fn test_terminal_status_never_changes() {
        let mut record = started(&["perception"]);
        record
            .apply(JobTransition::Fail {
                index: Some(0),
                message: "boom".into(),
            })
            .unwrap();

        for transition in [
            JobTransition::Start { stages: vec![] },
            JobTransition::BeginStage { index: 0 },
            JobTransition::Complete,
            JobTransition::Fail {
                index: None,
                message: "again".into(),
            },
        ] {
            let err = record.apply(transition).unwrap_err();
            assert_eq!(err.from, "failed");
        }
        assert_eq!(record.error.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn test_fail_names_stage() {
        let mut record = started(&["perception", "deescalation", "report"]);
        run_stage(&mut record, 0);
        record.apply(JobTransition::BeginStage { index: 1 }).unwrap();
        record
            .apply(JobTransition::Fail {
                index: Some(1),
                message: "quota".into(),
            })
            .unwrap();

        let error = record.error.unwrap();
        assert_eq!(error.stage.as_deref(), Some("deescalation"));
        assert_eq!(error.index, Some(1));
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.current_stage.is_none());
    }

    #[test]
    fn test_stages_must_run_in_order() {
        let mut record = started(&["perception", "report"]);
        let err = record
            .apply(JobTransition::BeginStage { index: 1 })
            .unwrap_err();
        assert_eq!(err.attempted, "begin_stage");
        assert_eq!(record.status, JobStatus::Running);
    }

    #[test]
    fn test_outputs_never_exceed_plan() {
        let mut record = started(&["perception"]);
        run_stage(&mut record, 0);

        assert!(record.apply(JobTransition::BeginStage { index: 1 }).is_err());
        assert_eq!(record.stage_outputs.len(), 1);
    }

    #[test]
    fn test_complete_requires_every_stage() {
        let mut record = started(&["perception", "report"]);
        run_stage(&mut record, 0);

        let err = record.apply(JobTransition::Complete).unwrap_err();
        assert!(err.reason.contains("1 of 2"));
    }

    #[test]
    fn test_cannot_start_twice_or_begin_before_start() {
        let mut record = JobRecord::new(JobId::new(), None);
        assert!(record.apply(JobTransition::BeginStage { index: 0 }).is_err());

        record
            .apply(JobTransition::Start {
                stages: vec!["perception".into()],
            })
            .unwrap();
        assert!(record
            .apply(JobTransition::Start {
                stages: vec!["perception".into()],
            })
            .is_err());
    }

    #[test]
    fn test_submission_options() {
        let submission = Submission::new("clip.mov").with_option(VOICE_OPTION, "Kore");
        assert_eq!(submission.voice(), Some("Kore"));
        assert_eq!(submission.option("missing"), None);
    }
}
