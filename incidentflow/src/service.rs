//! The boundary operations: submit, attach, query status, fetch artifact.

use crate::artifacts::ArtifactStore;
use crate::core::{guess_media_type, JobId, StageResult};
use crate::errors::{IncidentflowError, InvalidTransitionError, Result};
use crate::events::{DeliveryMetrics, Observer, ProgressBus};
use crate::jobs::{JobError, JobRecord, JobStore, JobSummary, Submission, VOICE_OPTION};
use crate::pipeline::PipelineRunner;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Media extensions accepted by [`JobService::submit`].
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "webm"];

/// Voice used when a submission does not pick one.
pub const DEFAULT_VOICE: &str = "Puck";

/// All outputs of a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    /// The job.
    pub job_id: JobId,
    /// Final status label.
    pub status: String,
    /// Stage results in execution order.
    pub outputs: Vec<StageResult>,
    /// Failure detail, if the job failed.
    pub error: Option<JobError>,
    /// When the job reached its terminal state.
    pub completed_at: Option<Timestamp>,
}

/// Artifact bytes plus what a client needs to serve them.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// File name for downloads.
    pub file_name: String,
    /// Guessed media type.
    pub media_type: &'static str,
    /// Contents.
    pub bytes: Vec<u8>,
}

/// Entry point for everything outside the core.
#[derive(Debug, Clone)]
pub struct JobService {
    runner: Arc<PipelineRunner>,
    default_voice: String,
    upload_dir: Option<PathBuf>,
}

impl JobService {
    /// Creates a service that runs jobs on `runner`.
    #[must_use]
    pub fn new(runner: Arc<PipelineRunner>) -> Self {
        Self {
            runner,
            default_voice: DEFAULT_VOICE.to_string(),
            upload_dir: None,
        }
    }

    /// Sets the voice applied when a submission has none.
    #[must_use]
    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    /// Resolves relative inputs against `dir`.
    #[must_use]
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    fn store(&self) -> &JobStore {
        self.runner.store()
    }

    fn bus(&self) -> &ProgressBus {
        self.runner.bus()
    }

    /// Validates `submission`, records the job and starts it in the background.
    ///
    /// Returns as soon as the job exists; no stage has run yet.
    pub fn submit(&self, mut submission: Submission) -> Result<JobId> {
        validate_input(&submission.input)?;

        if let Some(dir) = &self.upload_dir {
            if Path::new(&submission.input).is_relative() {
                submission.input = dir.join(&submission.input).to_string_lossy().into_owned();
            }
        }
        submission
            .options
            .entry(VOICE_OPTION.to_string())
            .or_insert_with(|| self.default_voice.clone());

        let job_id = self.store().create_for(submission);
        self.bus().open(job_id)?;
        self.runner.spawn(job_id);
        info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Opens a progress observer: full history, then live events.
    pub fn attach(&self, job_id: JobId) -> Result<Observer> {
        self.bus().attach(job_id)
    }

    /// Current snapshot of the job.
    pub fn status(&self, job_id: JobId) -> Result<JobRecord> {
        self.store().get(job_id)
    }

    /// Summaries of every known job, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<JobSummary> {
        self.store().list()
    }

    /// All stage outputs once the job is terminal.
    pub fn results(&self, job_id: JobId) -> Result<JobResults> {
        let record = self.store().get(job_id)?;
        if !record.is_terminal() {
            return Err(InvalidTransitionError::new(
                job_id,
                record.status.label(),
                "results",
                "job not yet completed",
            )
            .into());
        }
        Ok(JobResults {
            job_id,
            status: record.status.label().to_string(),
            outputs: record.stage_outputs,
            error: record.error,
            completed_at: record.completed_at,
        })
    }

    /// Reads an artifact from the job's namespace.
    pub async fn fetch_artifact(&self, job_id: JobId, path: &str) -> Result<Artifact> {
        if !self.store().contains(job_id) {
            return Err(IncidentflowError::NotFound(job_id));
        }
        let bytes = self.runner.artifacts().fetch(job_id, path).await?;
        let file_name = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(Artifact {
            file_name,
            media_type: guess_media_type(path),
            bytes,
        })
    }

    /// Delivery counters for the progress bus.
    #[must_use]
    pub fn metrics(&self) -> &DeliveryMetrics {
        self.bus().metrics()
    }
}

fn validate_input(input: &str) -> Result<()> {
    if input.trim().is_empty() {
        return Err(IncidentflowError::Validation("No video file provided".to_string()));
    }
    let extension = Path::new(input)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(IncidentflowError::Validation(format!(
            "Invalid file type. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::core::JobStatus;
    use crate::stages::Stage;
    use crate::testing::{GatedStage, SuccessStage};
    use futures::StreamExt;

    fn service_with(stages: Vec<Arc<dyn Stage>>) -> (JobService, Arc<InMemoryArtifactStore>) {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let runner = PipelineRunner::new(
            stages,
            Arc::new(JobStore::new()),
            Arc::new(ProgressBus::default()),
        )
        .unwrap()
        .with_artifacts(artifacts.clone());
        (JobService::new(Arc::new(runner)), artifacts)
    }

    async fn wait_for_done(service: &JobService, job_id: JobId) {
        let observer = service.attach(job_id).unwrap();
        let _events: Vec<_> = observer.collect().await;
    }

    #[test]
    fn test_validate_input() {
        assert!(validate_input("clip.MP4").is_ok());
        assert!(validate_input("uploads/a/b.webm").is_ok());
        assert!(validate_input("notes.txt").is_err());
        assert!(validate_input("video").is_err());
        assert!(validate_input("  ").is_err());
    }

    #[tokio::test]
    async fn test_submit_defaults_voice_and_resolves_upload_dir() {
        let (service, _) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let service = service.with_upload_dir("uploads").with_default_voice("Kore");

        let job_id = service.submit(Submission::new("dashcam.mov")).unwrap();
        let record = service.status(job_id).unwrap();
        let submission = record.submission.unwrap();

        assert_eq!(submission.voice(), Some("Kore"));
        assert_eq!(
            Path::new(&submission.input),
            Path::new("uploads").join("dashcam.mov")
        );
    }

    #[tokio::test]
    async fn test_submit_keeps_explicit_voice() {
        let (service, _) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let job_id = service
            .submit(Submission::new("/data/dashcam.mp4").with_option("voice", "Charon"))
            .unwrap();

        let submission = service.status(job_id).unwrap().submission.unwrap();
        assert_eq!(submission.voice(), Some("Charon"));
        assert_eq!(submission.input, "/data/dashcam.mp4");
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_extension() {
        let (service, _) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let err = service.submit(Submission::new("report.pdf")).unwrap_err();

        assert!(matches!(err, IncidentflowError::Validation(_)));
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn test_submit_returns_before_stages_run() {
        let gate = Arc::new(GatedStage::new("perception"));
        let (service, _) = service_with(vec![gate.clone()]);

        let job_id = service.submit(Submission::new("clip.mp4")).unwrap();
        gate.wait_started().await;

        let record = service.status(job_id).unwrap();
        assert_eq!(record.current_stage.as_deref(), Some("perception"));
        assert!(matches!(
            service.results(job_id),
            Err(IncidentflowError::InvalidTransition(_))
        ));

        gate.release();
        wait_for_done(&service, job_id).await;
        let results = service.results(job_id).unwrap();
        assert_eq!(results.status, "completed");
        assert_eq!(results.outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_list_summaries() {
        let (service, _) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let first = service.submit(Submission::new("a.mp4")).unwrap();
        let second = service.submit(Submission::new("b.mp4")).unwrap();
        wait_for_done(&service, first).await;
        wait_for_done(&service, second).await;

        let ids: Vec<JobId> = service.list().iter().map(|s| s.job_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first) && ids.contains(&second));
        assert!(service.list().iter().all(|s| s.completed));
        assert_eq!(service.status(first).unwrap().status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_unknown_job_operations() {
        let (service, _) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let job_id = JobId::new();

        assert!(matches!(service.status(job_id), Err(IncidentflowError::NotFound(_))));
        assert!(matches!(service.attach(job_id), Err(IncidentflowError::NotFound(_))));
        assert!(matches!(service.results(job_id), Err(IncidentflowError::NotFound(_))));
        assert!(matches!(
            service.fetch_artifact(job_id, "report.txt").await,
            Err(IncidentflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_artifact() {
        let (service, artifacts) = service_with(vec![Arc::new(SuccessStage::new("perception"))]);
        let job_id = service.submit(Submission::new("clip.mp4")).unwrap();
        artifacts
            .put(job_id, "reports/incident_report.txt", b"Summary".to_vec())
            .await
            .unwrap();

        let artifact = service
            .fetch_artifact(job_id, "reports/incident_report.txt")
            .await
            .unwrap();
        assert_eq!(artifact.file_name, "incident_report.txt");
        assert_eq!(artifact.media_type, "text/plain; charset=utf-8");
        assert_eq!(artifact.bytes, b"Summary");

        assert!(matches!(
            service.fetch_artifact(job_id, "missing.wav").await,
            Err(IncidentflowError::Artifact(_))
        ));
    }
}
