//! Stage output types.

use super::ArtifactRef;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The output of a successful stage execution.
///
/// `data` is the full stage result handed to later stages. `summary` is the
/// smaller payload published with the stage's completion event; when absent
/// the completion event carries `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The stage result.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Payload for the completion event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,

    /// Artifacts written by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutput {
    /// Creates an output carrying `data`.
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Creates an output with no data.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Null)
    }

    /// Sets the completion summary.
    #[must_use]
    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Adds an artifact reference.
    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Gets a top-level field of `data`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// The payload to publish with the completion event.
    ///
    /// Artifact references are always included so observers can fetch them.
    #[must_use]
    pub fn completion_payload(&self) -> serde_json::Value {
        let mut payload = match self.summary.as_ref().unwrap_or(&self.data) {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".to_string(), other.clone());
                map
            }
        };
        if !self.artifacts.is_empty() {
            payload.insert("artifacts".to_string(), serde_json::json!(self.artifacts));
        }
        serde_json::Value::Object(payload)
    }
}

/// A completed stage's output, keyed by stage identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// Position in the pipeline.
    pub index: usize,
    /// What the stage produced.
    pub output: StageOutput,
    /// Execution time in milliseconds.
    pub duration_ms: f64,
    /// When the stage finished.
    pub completed_at: Timestamp,
}
