//! Artifact references carried by stage outputs.

use serde::{Deserialize, Serialize};

/// A stable, resolvable reference to a file a stage produced.
///
/// `path` is relative to the job's artifact root and is what clients pass
/// back to fetch the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Short label (e.g., "report", "audio").
    pub name: String,

    /// Path relative to the job's artifact root.
    pub path: String,

    /// MIME type, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl ArtifactRef {
    /// Creates a new artifact reference.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            media_type: None,
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Guesses a MIME type from the path extension.
    #[must_use]
    pub fn guessed_media_type(&self) -> &str {
        if let Some(ref media_type) = self.media_type {
            return media_type;
        }
        guess_media_type(&self.path)
    }
}

/// Guesses a MIME type from a file extension.
#[must_use]
pub fn guess_media_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("html") => "text/html; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    }
}
