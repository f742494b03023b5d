//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::core::{JobId, StageOutput};
use crate::errors::StageError;
use crate::stages::{Stage, StageContext};

/// A mock stage that records calls and returns a configurable result.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    result: Mutex<Result<StageOutput, StageError>>,
    call_count: AtomicUsize,
    jobs: Mutex<Vec<JobId>>,
}

impl MockStage {
    /// Creates a new mock stage that succeeds with an empty output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Mutex::new(Ok(StageOutput::empty())),
            call_count: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Sets the output to return.
    pub fn set_output(&self, output: StageOutput) {
        *self.result.lock() = Ok(output);
    }

    /// Makes subsequent calls fail with `error`.
    pub fn set_error(&self, error: StageError) {
        *self.result.lock() = Err(error);
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Jobs the stage ran for, in call order.
    #[must_use]
    pub fn recorded_jobs(&self) -> Vec<JobId> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push(ctx.job_id());
        self.result.lock().clone()
    }
}

/// A stage that always succeeds with a fixed output.
#[derive(Debug)]
pub struct SuccessStage {
    name: String,
    output: StageOutput,
}

impl SuccessStage {
    /// Creates a new success stage with an empty output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_output(name, StageOutput::empty())
    }

    /// Creates a success stage returning `output`.
    #[must_use]
    pub fn with_output(name: impl Into<String>, output: StageOutput) -> Self {
        Self {
            name: name.into(),
            output,
        }
    }
}

#[async_trait]
impl Stage for SuccessStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        Ok(self.output.clone())
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: StageError,
    call_count: AtomicUsize,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: StageError::new(error),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Creates a stage failing with a retryable error.
    #[must_use]
    pub fn retryable(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: StageError::retryable(error),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutput::new(serde_json::json!({
            "slept_ms": self.delay.as_millis() as u64
        })))
    }
}

/// A stage that fails with a retryable error a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    name: String,
    failures: usize,
    call_count: AtomicUsize,
}

impl FlakyStage {
    /// Creates a stage that fails its first `failures` calls.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FlakyStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(StageError::retryable(format!("transient failure #{}", call + 1)))
        } else {
            Ok(StageOutput::new(serde_json::json!({ "attempts": call + 1 })))
        }
    }
}

/// A stage that blocks until released, for observing a job mid-flight.
#[derive(Debug)]
pub struct GatedStage {
    name: String,
    started: Notify,
    gate: Notify,
}

impl GatedStage {
    /// Creates a closed gate.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Waits until the stage has begun executing.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets the waiting execution finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Stage for GatedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.started.notify_one();
        self.gate.notified().await;
        Ok(StageOutput::empty())
    }
}

/// A stage that records what it saw on every execution.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    executions: Mutex<Vec<RecordedExecution>>,
}

/// A recorded execution.
#[derive(Debug, Clone)]
pub struct RecordedExecution {
    /// The job the stage ran for.
    pub job_id: JobId,
    /// Position of the stage in the plan.
    pub index: usize,
    /// Names of the stages whose outputs were visible.
    pub prior_stages: Vec<String>,
    /// When execution started.
    pub started_at: Instant,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Returns all recorded executions.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().clone()
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.executions.lock().push(RecordedExecution {
            job_id: ctx.job_id(),
            index: ctx.index(),
            prior_stages: ctx
                .prior_outputs()
                .iter()
                .map(|result| result.stage.clone())
                .collect(),
            started_at: Instant::now(),
        });
        Ok(StageOutput::new(serde_json::json!({ "stage": self.name })))
    }
}

/// A stage that panics instead of returning.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
    message: String,
}

impl PanickingStage {
    /// Creates a stage that panics with `message`.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        panic!("{}", self.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Submission;
    use std::sync::Arc;

    fn test_context(name: &str) -> StageContext {
        StageContext::new(JobId::new(), name, 0, Submission::new("clip.mp4"))
    }

    #[tokio::test]
    async fn test_mock_stage() {
        let stage = MockStage::new("test");
        let ctx = test_context("test");

        assert!(stage.execute(&ctx).await.is_ok());
        assert_eq!(stage.call_count(), 1);

        stage.set_error(StageError::new("error"));
        assert!(stage.execute(&ctx).await.is_err());
        assert_eq!(stage.call_count(), 2);
        assert_eq!(stage.recorded_jobs(), vec![ctx.job_id(), ctx.job_id()]);
    }

    #[tokio::test]
    async fn test_success_stage_with_output() {
        let stage = SuccessStage::with_output(
            "perception",
            StageOutput::new(serde_json::json!({"key": "value"})),
        );

        let output = stage.execute(&test_context("perception")).await.unwrap();
        assert_eq!(output.get("key"), Some(&serde_json::json!("value")));
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let stage = FailingStage::new("fail", "test error");
        let err = stage.execute(&test_context("fail")).await.unwrap_err();
        assert!(!err.retryable);

        let stage = FailingStage::retryable("fail", "retry me");
        let err = stage.execute(&test_context("fail")).await.unwrap_err();
        assert!(err.retryable);
        assert_eq!(stage.call_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_stage() {
        let stage = SlowStage::with_delay_ms("slow", 10);

        let start = Instant::now();
        let output = stage.execute(&test_context("slow")).await;

        assert!(output.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_flaky_stage() {
        let stage = FlakyStage::new("flaky", 1);
        let ctx = test_context("flaky");

        assert!(stage.execute(&ctx).await.unwrap_err().retryable);
        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("attempts"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_gated_stage() {
        let stage = Arc::new(GatedStage::new("gate"));
        let runner = {
            let stage = Arc::clone(&stage);
            tokio::spawn(async move { stage.execute(&test_context("gate")).await })
        };

        stage.wait_started().await;
        assert!(!runner.is_finished());
        stage.release();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_recording_stage() {
        let stage = RecordingStage::new("record");
        let ctx = test_context("record");

        stage.execute(&ctx).await.unwrap();
        stage.execute(&ctx).await.unwrap();

        assert_eq!(stage.execution_count(), 2);
        let executions = stage.executions();
        assert_eq!(executions[0].job_id, ctx.job_id());
        assert!(executions[0].prior_stages.is_empty());
    }
}
