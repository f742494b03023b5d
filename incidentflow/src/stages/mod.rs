//! Stage trait and implementations.
//!
//! Stages are the opaque units of work a job runs in order. The runner
//! treats every stage uniformly; what a stage actually does (perception,
//! guidance synthesis, report compilation) lives behind [`Stage::execute`].

mod command;
mod context;
mod retry;

pub use command::CommandStage;
pub use context::{StageContext, StageReporter};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryState, RetryingStage};

use crate::core::{StageKind, StageOutput};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Message published with the stage's `step_start` event.
    fn start_message(&self) -> String {
        match self.name().parse::<StageKind>() {
            Ok(kind) => kind.start_message().to_string(),
            Err(_) => format!("Running {}...", self.name()),
        }
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context, including prior outputs
    ///
    /// # Returns
    ///
    /// The stage output, or the error that fails the job.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SuccessStage;

    #[test]
    fn test_start_message_for_known_kinds() {
        let stage = SuccessStage::new("perception");
        assert_eq!(stage.start_message(), StageKind::Perception.start_message());

        let custom = SuccessStage::new("transcode");
        assert_eq!(custom.start_message(), "Running transcode...");
    }
}
