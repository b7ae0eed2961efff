//! Ordering of rendered artifacts for final assembly.
//!
//! The renderer names its outputs `<prefix>_<counter>_.<ext>`, e.g.
//! `ByteDance-Seedance_00003_.mp4`. The merge step concatenates them in
//! counter order.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::CoreError;

/// Filename prefix the default video workflow writes.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "ByteDance-Seedance";

/// Extension of the artifacts counted and merged.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "mp4";

/// Whether `path` has the artifact `extension` (case-insensitive).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Matches renderer output filenames for one prefix and extension.
#[derive(Debug, Clone)]
pub struct ArtifactNamePattern {
    re: Regex,
}

impl ArtifactNamePattern {
    pub fn new(prefix: &str, extension: &str) -> Result<Self, CoreError> {
        if prefix.is_empty() || extension.is_empty() {
            return Err(CoreError::Validation(
                "Artifact prefix and extension must not be empty".to_string(),
            ));
        }
        let pattern = format!(
            r"^{}_(\d+)_\.{}$",
            regex::escape(prefix),
            regex::escape(extension)
        );
        let re = Regex::new(&pattern)
            .map_err(|e| CoreError::Validation(format!("Invalid artifact pattern: {e}")))?;
        Ok(Self { re })
    }

    /// Counter embedded in `filename`, if it matches.
    pub fn sequence(&self, filename: &str) -> Option<u64> {
        self.re
            .captures(filename)
            .and_then(|caps| caps[1].parse().ok())
    }
}

impl Default for ArtifactNamePattern {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIFACT_PREFIX, DEFAULT_ARTIFACT_EXTENSION)
            .expect("default artifact pattern is valid")
    }
}

/// Keep the paths whose filenames match `pattern`, sorted by counter.
///
/// Fails when nothing matches.
pub fn order_artifacts(
    paths: &[PathBuf],
    pattern: &ArtifactNamePattern,
) -> Result<Vec<PathBuf>, CoreError> {
    let mut matched: Vec<(u64, &PathBuf)> = paths
        .iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            pattern.sequence(name).map(|n| (n, p))
        })
        .collect();

    if matched.is_empty() {
        return Err(CoreError::NotFound {
            entity: "rendered artifact",
            id: "any".to_string(),
        });
    }

    matched.sort_by_key(|(n, _)| *n);
    Ok(matched.into_iter().map(|(_, p)| p.clone()).collect())
}

/// Render an ffmpeg concat-demuxer list, one `file '<path>'` line per input.
///
/// Single quotes inside paths are escaped the way the demuxer expects.
pub fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}
