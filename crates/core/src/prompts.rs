//! Per-segment prompt document.
//!
//! The prompt stage writes one JSON array per run, one entry per segment:
//!
//! ```json
//! [{"segment": 1, "time": 5, "lyrics": "...", "prompt": "slow dolly-in, ..."}]
//! ```
//!
//! The render stage looks entries up by segment id.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::SegmentId;

/// Directive and timing for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPrompt {
    pub segment: SegmentId,
    /// Clip duration in whole seconds.
    pub time: u32,
    /// Lyrics the directive was derived from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    /// Textual directive sent to the renderer.
    pub prompt: String,
}

/// The full prompt document for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptDocument {
    entries: Vec<SegmentPrompt>,
}

impl PromptDocument {
    pub fn new(entries: Vec<SegmentPrompt>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::Parse(format!("Invalid prompt document: {e}")))
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Parse(format!("Cannot serialize prompt document: {e}")))
    }

    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Write the document to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| CoreError::io(path, e))
    }

    /// Entry for `segment`. The first match wins.
    pub fn find(&self, segment: SegmentId) -> Result<&SegmentPrompt, CoreError> {
        self.entries
            .iter()
            .find(|e| e.segment == segment)
            .ok_or_else(|| CoreError::NotFound {
                entity: "segment prompt",
                id: segment.to_string(),
            })
    }

    /// Segment ids in document order.
    pub fn segments(&self) -> Vec<SegmentId> {
        self.entries.iter().map(|e| e.segment).collect()
    }

    pub fn entries(&self) -> &[SegmentPrompt] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
