//! Artifact storage for files produced by stages.
//!
//! Stage outputs carry [`ArtifactRef`](crate::core::ArtifactRef) paths that
//! are relative to a per-job namespace; an [`ArtifactStore`] resolves them.

use crate::core::JobId;
use crate::errors::ArtifactError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Storage backend for job artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Stores `bytes` under `path` in the job's namespace.
    async fn put(&self, job_id: JobId, path: &str, bytes: Vec<u8>) -> Result<(), ArtifactError>;

    /// Returns the bytes stored under `path`.
    async fn fetch(&self, job_id: JobId, path: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Local directory a stage may write into directly, if the backend has one.
    fn job_dir(&self, _job_id: JobId) -> Option<PathBuf> {
        None
    }
}

/// Validates an artifact path and returns its normalized relative form.
///
/// Rejects empty paths, absolute paths, and any `..` component.
pub fn normalize_artifact_path(path: &str) -> Result<PathBuf, ArtifactError> {
    let candidate = Path::new(path);
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArtifactError::invalid_path(path));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(ArtifactError::invalid_path(path));
    }
    Ok(normalized)
}

/// Filesystem store rooted at `<root>/<job_id>/`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, job_id: JobId, path: &str) -> Result<PathBuf, ArtifactError> {
        let relative = normalize_artifact_path(path)?;
        Ok(self.root.join(job_id.to_string()).join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, job_id: JobId, path: &str, bytes: Vec<u8>) -> Result<(), ArtifactError> {
        let target = self.resolve(job_id, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        debug!(job_id = %job_id, path, "Stored artifact");
        Ok(())
    }

    async fn fetch(&self, job_id: JobId, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let target = self.resolve(job_id, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::not_found(path))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn job_dir(&self, job_id: JobId) -> Option<PathBuf> {
        Some(self.root.join(job_id.to_string()))
    }
}

/// In-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    files: DashMap<(JobId, PathBuf), Vec<u8>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts across all jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, job_id: JobId, path: &str, bytes: Vec<u8>) -> Result<(), ArtifactError> {
        let key = (job_id, normalize_artifact_path(path)?);
        self.files.insert(key, bytes);
        Ok(())
    }

    async fn fetch(&self, job_id: JobId, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let key = (job_id, normalize_artifact_path(path)?);
        self.files
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ArtifactError::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_artifact_path() {
        assert_eq!(
            normalize_artifact_path("report/summary.txt").unwrap(),
            PathBuf::from("report/summary.txt")
        );
        assert_eq!(
            normalize_artifact_path("./audio.wav").unwrap(),
            PathBuf::from("audio.wav")
        );
        assert!(normalize_artifact_path("../secret").is_err());
        assert!(normalize_artifact_path("a/../../b").is_err());
        assert!(normalize_artifact_path("/etc/passwd").is_err());
        assert!(normalize_artifact_path("").is_err());
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let job_id = JobId::new();

        store
            .put(job_id, "guidance/incident_1.wav", b"RIFF".to_vec())
            .await
            .unwrap();

        let bytes = store.fetch(job_id, "guidance/incident_1.wav").await.unwrap();
        assert_eq!(bytes, b"RIFF");
        assert!(dir
            .path()
            .join(job_id.to_string())
            .join("guidance/incident_1.wav")
            .exists());
        assert_eq!(
            store.job_dir(job_id),
            Some(dir.path().join(job_id.to_string()))
        );
    }

    #[tokio::test]
    async fn test_fs_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let err = store.fetch(JobId::new(), "nope.txt").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let err = store.fetch(JobId::new(), "../other/report.txt").await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_scoped_per_job() {
        let store = InMemoryArtifactStore::new();
        let first = JobId::new();
        let second = JobId::new();

        store.put(first, "report.txt", b"one".to_vec()).await.unwrap();

        assert_eq!(store.fetch(first, "report.txt").await.unwrap(), b"one");
        assert!(store.fetch(second, "report.txt").await.is_err());
        assert_eq!(store.len(), 1);
    }
}
