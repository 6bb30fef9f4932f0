//! Artifact persistence.
//!
//! Artifacts are addressed by a relative, `/`-separated id such as
//! `stages/research/perspectives/architecture.json`. Writers treat failures
//! as warnings; only the controller's evidence reads are load-bearing.

pub mod fs;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{PipelineError, Result};

pub use fs::FsArtifactStore;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `content` under `artifact_id`, replacing any previous content.
    /// Returns where the artifact now lives.
    async fn write(&self, artifact_id: &str, content: &str) -> Result<PathBuf>;

    /// Read an artifact, or `None` if it was never written.
    async fn read(&self, artifact_id: &str) -> Result<Option<String>>;
}

/// Reject ids that are empty, absolute, or escape the store root.
pub fn validate_artifact_id(artifact_id: &str) -> Result<()> {
    let invalid = artifact_id.is_empty()
        || artifact_id.starts_with('/')
        || artifact_id.contains('\\')
        || artifact_id
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        Err(PipelineError::InvalidArtifactId(artifact_id.to_string()))
    } else {
        Ok(())
    }
}
