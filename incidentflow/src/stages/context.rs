//! Execution context handed to each stage.

use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::core::{EventKind, JobId, StageOutput, StageResult};
use crate::events::ProgressBus;
use crate::jobs::Submission;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes stage-originated `warning` and `<stage>_progress` events.
///
/// Reports are published synchronously on the caller's task, which is the
/// runner's task while a stage executes.
#[derive(Debug, Clone)]
pub struct StageReporter {
    job_id: JobId,
    stage: String,
    bus: Option<Arc<ProgressBus>>,
}

impl StageReporter {
    /// Creates a reporter for `stage` of `job_id`.
    #[must_use]
    pub fn new(job_id: JobId, stage: impl Into<String>, bus: Option<Arc<ProgressBus>>) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            bus,
        }
    }

    /// Publishes a `warning` event.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.job_id, stage = %self.stage, "{message}");
        self.publish(
            EventKind::Warning,
            json!({ "stage": self.stage, "message": message }),
        );
    }

    /// Publishes a `<stage>_progress` event.
    pub fn progress(&self, data: serde_json::Value) {
        self.publish(EventKind::StageProgress(self.stage.clone()), data);
    }

    fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(err) = bus.publish(self.job_id, kind, payload) {
            debug!(job_id = %self.job_id, stage = %self.stage, error = %err, "Dropped stage report");
        }
    }
}

/// Everything a stage may read while it runs.
#[derive(Debug, Clone)]
pub struct StageContext {
    job_id: JobId,
    stage: String,
    index: usize,
    submission: Submission,
    prior_outputs: Vec<StageResult>,
    artifacts: Arc<dyn ArtifactStore>,
    reporter: StageReporter,
}

impl StageContext {
    /// Creates a context with no prior outputs, an in-memory artifact store
    /// and no progress bus.
    #[must_use]
    pub fn new(job_id: JobId, stage: impl Into<String>, index: usize, submission: Submission) -> Self {
        let stage = stage.into();
        Self {
            job_id,
            reporter: StageReporter::new(job_id, stage.clone(), None),
            stage,
            index,
            submission,
            prior_outputs: Vec::new(),
            artifacts: Arc::new(InMemoryArtifactStore::new()),
        }
    }

    /// Sets the outputs of the stages that already completed.
    #[must_use]
    pub fn with_prior_outputs(mut self, outputs: Vec<StageResult>) -> Self {
        self.prior_outputs = outputs;
        self
    }

    /// Sets the artifact store.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Routes warnings and progress reports to `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<ProgressBus>) -> Self {
        self.reporter = StageReporter::new(self.job_id, self.stage.clone(), Some(bus));
        self
    }

    /// The job being processed.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Name of the running stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Position of the running stage in the plan.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The job's submission.
    #[must_use]
    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    /// Results of earlier stages, in execution order.
    #[must_use]
    pub fn prior_outputs(&self) -> &[StageResult] {
        &self.prior_outputs
    }

    /// Output of an earlier stage by name.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<&StageOutput> {
        self.prior_outputs
            .iter()
            .find(|result| result.stage == stage)
            .map(|result| &result.output)
    }

    /// The artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Directory the stage may write artifacts into, for file-backed stores.
    #[must_use]
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.artifacts.job_dir(self.job_id)
    }

    /// The reporter for this stage.
    #[must_use]
    pub fn reporter(&self) -> &StageReporter {
        &self.reporter
    }

    /// Publishes a `warning` event for this stage.
    pub fn warn(&self, message: impl Into<String>) {
        self.reporter.warn(message);
    }

    /// Publishes a `<stage>_progress` event for this stage.
    pub fn progress(&self, data: serde_json::Value) {
        self.reporter.progress(data);
    }

    /// JSON document handed to external stage programs.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let prior: serde_json::Map<String, serde_json::Value> = self
            .prior_outputs
            .iter()
            .map(|result| {
                (
                    result.stage.clone(),
                    serde_json::to_value(&result.output).unwrap_or_default(),
                )
            })
            .collect();

        json!({
            "job_id": self.job_id,
            "stage": self.stage,
            "index": self.index,
            "input": self.submission.input,
            "options": self.submission.options,
            "prior_outputs": prior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BusConfig;
    use crate::utils::now_utc;

    fn perception_result() -> StageResult {
        StageResult {
            stage: "perception".to_string(),
            index: 0,
            output: StageOutput::new(json!({"incidents": [{"id": 1}]})),
            duration_ms: 12.0,
            completed_at: now_utc(),
        }
    }

    #[test]
    fn test_output_of_prior_stage() {
        let ctx = StageContext::new(JobId::new(), "deescalation", 1, Submission::new("clip.mp4"))
            .with_prior_outputs(vec![perception_result()]);

        let output = ctx.output_of("perception").unwrap();
        assert_eq!(output.get("incidents").unwrap()[0]["id"], 1);
        assert!(ctx.output_of("report").is_none());
    }

    #[test]
    fn test_to_json_carries_submission() {
        let job_id = JobId::new();
        let ctx = StageContext::new(
            job_id,
            "deescalation",
            1,
            Submission::new("uploads/clip.mp4").with_option("voice", "Kore"),
        )
        .with_prior_outputs(vec![perception_result()]);

        let doc = ctx.to_json();
        assert_eq!(doc["job_id"], job_id.to_string());
        assert_eq!(doc["input"], "uploads/clip.mp4");
        assert_eq!(doc["options"]["voice"], "Kore");
        assert_eq!(doc["index"], 1);
        assert!(doc["prior_outputs"]["perception"]["data"]["incidents"].is_array());
    }

    #[test]
    fn test_reports_publish_to_bus() {
        let bus = Arc::new(ProgressBus::new(BusConfig::default()));
        let job_id = JobId::new();
        bus.open(job_id).unwrap();

        let ctx = StageContext::new(job_id, "deescalation", 1, Submission::new("clip.mp4"))
            .with_bus(Arc::clone(&bus));
        ctx.progress(json!({"incident": 1, "total": 2}));
        ctx.warn("TTS unavailable");

        let history = bus.history(job_id).unwrap();
        let types: Vec<String> = history.iter().map(|e| e.kind.to_string()).collect();
        assert_eq!(types, vec!["connected", "deescalation_progress", "warning"]);
        assert_eq!(history[2].payload["message"], "TTS unavailable");
        assert_eq!(history[2].payload["stage"], "deescalation");
    }

    #[test]
    fn test_reports_without_bus_are_dropped() {
        let ctx = StageContext::new(JobId::new(), "report", 2, Submission::new("clip.mp4"));
        ctx.warn("nothing listening");
        assert!(ctx.output_dir().is_none());
    }
}
