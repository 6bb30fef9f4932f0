use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{validate_artifact_id, ArtifactStore};
use crate::domain::{PipelineError, Result};

/// Filesystem-backed artifact store rooted at one workflow directory.
///
/// Layout: `<root>/<artifact id>`, e.g.
/// `<root>/stages/research/perspectives/architecture.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, artifact_id: &str) -> Result<PathBuf> {
        validate_artifact_id(artifact_id)?;
        Ok(artifact_id
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part)))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, artifact_id: &str, content: &str) -> Result<PathBuf> {
        let path = self.path_for(artifact_id)?;
        let dir = path
            .parent()
            .ok_or_else(|| PipelineError::InvalidArtifactId(artifact_id.to_string()))?;
        fs::create_dir_all(dir)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(path)
    }

    async fn read(&self, artifact_id: &str) -> Result<Option<String>> {
        let path = self.path_for(artifact_id)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }
}
