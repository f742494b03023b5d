//! Drives one job through its ordered stages.

use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::core::{EventKind, JobId};
use crate::errors::{IncidentflowError, Result, StageError, StageFailureError};
use crate::events::ProgressBus;
use crate::jobs::{JobRecord, JobStore, JobTransition};
use crate::observability::job_span;
use crate::stages::{Stage, StageContext};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Executes the configured stage sequence for a job.
///
/// Every transition is written to the [`JobStore`] before the matching
/// event is published, so a status read is never behind the last event an
/// observer has seen. Stages run fail-fast: the first error is terminal and
/// later stages never execute. The runner does not retry; wrap a stage in
/// [`RetryingStage`](crate::stages::RetryingStage) for that.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    stages: Vec<Arc<dyn Stage>>,
    store: Arc<JobStore>,
    bus: Arc<ProgressBus>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl PipelineRunner {
    /// Creates a runner over `stages`.
    ///
    /// Fails with `Validation` if the sequence is empty or stage names repeat,
    /// since stage outputs are keyed by name.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        store: Arc<JobStore>,
        bus: Arc<ProgressBus>,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(IncidentflowError::Validation(
                "pipeline needs at least one stage".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name().to_string()) {
                return Err(IncidentflowError::Validation(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }
        Ok(Self {
            stages,
            store,
            bus,
            artifacts: Arc::new(InMemoryArtifactStore::new()),
        })
    }

    /// Sets the artifact store handed to stages.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// The job store.
    #[must_use]
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// The progress bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// The artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Runs `job_id` on a background task.
    pub fn spawn(self: &Arc<Self>, job_id: JobId) -> JoinHandle<Result<JobRecord>> {
        let runner = Arc::clone(self);
        tokio::spawn(
            async move {
                let result = runner.run(job_id).await;
                if let Err(ref err) = result {
                    warn!(job_id = %job_id, error = %err, "Job did not complete");
                }
                result
            }
            .instrument(job_span(job_id)),
        )
    }

    /// Runs every stage of `job_id` to completion or first failure.
    ///
    /// Returns the final record on success and `StageFailure` when a stage
    /// failed. A job that is not `Queued` is rejected with
    /// `InvalidTransition` before anything is published, so two runners
    /// can never drive the same job.
    pub async fn run(&self, job_id: JobId) -> Result<JobRecord> {
        let stages = self.stage_names();
        let record = self.store.update(
            job_id,
            JobTransition::Start {
                stages: stages.clone(),
            },
        )?;
        info!(job_id = %job_id, stages = ?stages, "Job started");

        let result = match self.bus.open(job_id) {
            Ok(()) => self.drive(job_id, record).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(record) => Ok(record),
            Err(err) => {
                if !matches!(err, IncidentflowError::StageFailure(_)) {
                    self.abort(job_id, &err);
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, job_id: JobId, record: JobRecord) -> Result<JobRecord> {
        let started = Instant::now();
        let submission = record.submission.clone().unwrap_or_default();
        self.bus.publish(
            job_id,
            EventKind::Status,
            json!({
                "status": record.status.label(),
                "step": null,
                "stages": record.stage_plan,
            }),
        )?;

        let mut prior = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name().to_string();

            self.store.update(job_id, JobTransition::BeginStage { index })?;
            self.bus.publish(
                job_id,
                EventKind::StepStart,
                json!({
                    "step": name,
                    "index": index,
                    "message": stage.start_message(),
                }),
            )?;
            info!(job_id = %job_id, stage = %name, index, "Stage started");

            let ctx = StageContext::new(job_id, name.clone(), index, submission.clone())
                .with_prior_outputs(prior.clone())
                .with_artifacts(Arc::clone(&self.artifacts))
                .with_bus(Arc::clone(&self.bus));

            let stage_started = Instant::now();
            let outcome = AssertUnwindSafe(stage.execute(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_to_stage_error(panic.as_ref())));
            match outcome {
                Ok(output) => {
                    let duration_ms = stage_started.elapsed().as_secs_f64() * 1000.0;
                    let payload = output.completion_payload();
                    let record = self.store.update(
                        job_id,
                        JobTransition::CompleteStage {
                            index,
                            output,
                            duration_ms,
                        },
                    )?;
                    prior = record.stage_outputs;
                    self.bus
                        .publish(job_id, EventKind::StepComplete(name.clone()), payload)?;
                    info!(job_id = %job_id, stage = %name, index, duration_ms, "Stage completed");
                }
                Err(err) => {
                    let failure = StageFailureError::new(name.clone(), index, err.message);
                    error!(job_id = %job_id, stage = %name, index, error = %failure.message, "Stage failed");
                    self.store.update(
                        job_id,
                        JobTransition::Fail {
                            index: Some(index),
                            message: failure.message.clone(),
                        },
                    )?;
                    self.bus.publish(
                        job_id,
                        EventKind::Error,
                        json!({
                            "stage": name,
                            "index": index,
                            "error": failure.message,
                        }),
                    )?;
                    self.bus.close(job_id)?;
                    return Err(failure.into());
                }
            }
        }

        let record = self.store.update(job_id, JobTransition::Complete)?;
        let elapsed_seconds = started.elapsed().as_secs_f64();
        self.bus.publish(
            job_id,
            EventKind::Complete,
            json!({ "elapsed_seconds": elapsed_seconds }),
        )?;
        self.bus.close(job_id)?;
        info!(job_id = %job_id, elapsed_seconds, "Job completed");
        Ok(record)
    }

    /// Best-effort terminal bookkeeping after an internal error.
    fn abort(&self, job_id: JobId, err: &IncidentflowError) {
        error!(job_id = %job_id, error = %err, "Job aborted");
        let message = err.to_string();
        if let Err(store_err) = self.store.update(
            job_id,
            JobTransition::Fail {
                index: None,
                message: message.clone(),
            },
        ) {
            warn!(job_id = %job_id, error = %store_err, "Could not mark job failed");
        }
        let published = self
            .bus
            .publish(job_id, EventKind::Error, json!({ "error": message }))
            .and_then(|_| self.bus.close(job_id));
        if let Err(bus_err) = published {
            warn!(job_id = %job_id, error = %bus_err, "Could not close progress log");
        }
    }
}

fn panic_to_stage_error(panic: &(dyn Any + Send)) -> StageError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    StageError::new(format!("stage panicked: {detail}"))
}
