//! The shared artifact directory every render job writes into.

use std::path::{Path, PathBuf};

use noonsong_core::assembly::has_extension;
use noonsong_core::error::CoreError;

/// Output directory plus the extension that marks a finished artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    path: PathBuf,
    extension: String,
}

impl ArtifactDir {
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Delete the directory and everything in it, then recreate it empty.
    pub async fn reset(&self) -> Result<(), CoreError> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::io(&self.path, e)),
        }
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| CoreError::io(&self.path, e))?;
        tracing::info!(dir = %self.path.display(), "Output directory reset");
        Ok(())
    }

    /// Artifact files currently present, sorted by path.
    ///
    /// A missing directory reads as empty.
    pub async fn list(&self) -> Result<Vec<PathBuf>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(&self.path, e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&self.path, e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file && has_extension(&path, &self.extension) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    pub async fn count(&self) -> Result<usize, CoreError> {
        Ok(self.list().await?.len())
    }
}
