//! Deciding which polygons still need fetching.

use std::fs;
use std::path::{Path, PathBuf};

use coverage_fetch_core::FetchRequest;

/// Where finished artifacts live.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Whether a finished artifact exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// Artifacts on the local filesystem. A non-empty regular file counts as
/// finished; atomic writes mean a file only appears once complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactStore;

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// The artifact is already present.
    Satisfied(PathBuf),
    /// The artifact must be fetched and written here.
    Pending(PathBuf),
}

/// Maps requests to artifact paths and checks for existing artifacts.
#[derive(Debug, Clone)]
pub struct ResumeFilter<S = FsArtifactStore> {
    output_dir: PathBuf,
    store: S,
}

impl ResumeFilter<FsArtifactStore> {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_store(output_dir, FsArtifactStore)
    }
}

impl<S: ArtifactStore> ResumeFilter<S> {
    pub fn with_store(output_dir: impl Into<PathBuf>, store: S) -> Self {
        Self {
            output_dir: output_dir.into(),
            store,
        }
    }

    pub fn artifact_path(&self, request: &FetchRequest) -> PathBuf {
        self.output_dir.join(request.file_name())
    }

    pub fn check(&self, request: &FetchRequest) -> ResumeDecision {
        let path = self.artifact_path(request);
        if self.store.exists(&path) {
            ResumeDecision::Satisfied(path)
        } else {
            ResumeDecision::Pending(path)
        }
    }
}
