//! Testing utilities for incidentflow pipelines.
//!
//! Mock stages with controllable outcomes, timing and call tracking.

mod mocks;

pub use mocks::{
    FailingStage, FlakyStage, GatedStage, MockStage, PanickingStage, RecordedExecution,
    RecordingStage, SlowStage, SuccessStage,
};
