//! Output manifest parsing for `/history/{prompt_id}` responses.
//!
//! The history payload has the shape
//! `{"<prompt_id>": {"outputs": {"<node_id>": {"videos": [..], "images": [..]}}}}`
//! where every listed file carries `filename`, `subfolder`, and `type`.

use serde::{Deserialize, Serialize};

/// Category of a declared output, keyed by the manifest field it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Video,
    Image,
    AnimatedImage,
}

impl OutputKind {
    /// Manifest field name for this kind.
    pub fn manifest_key(self) -> &'static str {
        match self {
            OutputKind::Video => "videos",
            OutputKind::Image => "images",
            OutputKind::AnimatedImage => "gifs",
        }
    }

    /// Kinds in the order they are collected from each node.
    pub const ALL: [OutputKind; 3] = [
        OutputKind::Video,
        OutputKind::Image,
        OutputKind::AnimatedImage,
    ];
}

/// One output file declared by a finished prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub node_id: String,
    pub kind: OutputKind,
    pub filename: String,
    pub subfolder: String,
    pub file_type: String,
}

#[derive(Deserialize)]
struct RawOutput {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(default, rename = "type")]
    file_type: String,
}

/// Errors reading a history payload.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The payload has no entry for the prompt.
    #[error("No history entry for prompt {0}")]
    MissingPrompt(String),

    /// An output entry could not be decoded.
    #[error("Malformed output on node {node_id}: {message}")]
    Malformed { node_id: String, message: String },
}

/// Collect every declared output for `prompt_id`.
///
/// Nodes are visited in ascending key order; within a node,
/// videos come before images before animated images. Nodes without
/// file outputs (e.g. text previews) are skipped.
pub fn parse_outputs(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<Vec<OutputFile>, HistoryError> {
    let entry = history
        .get(prompt_id)
        .ok_or_else(|| HistoryError::MissingPrompt(prompt_id.to_string()))?;

    let Some(outputs) = entry.get("outputs").and_then(|o| o.as_object()) else {
        return Ok(Vec::new());
    };

    let mut nodes: Vec<_> = outputs.iter().collect();
    nodes.sort_by(|a, b| a.0.cmp(b.0));

    let mut files = Vec::new();
    for (node_id, node_output) in nodes {
        for kind in OutputKind::ALL {
            let Some(items) = node_output.get(kind.manifest_key()) else {
                continue;
            };
            let raw: Vec<RawOutput> =
                serde_json::from_value(items.clone()).map_err(|e| HistoryError::Malformed {
                    node_id: node_id.clone(),
                    message: e.to_string(),
                })?;
            files.extend(raw.into_iter().map(|r| OutputFile {
                node_id: node_id.clone(),
                kind,
                filename: r.filename,
                subfolder: r.subfolder,
                file_type: r.file_type,
            }));
        }
    }

    Ok(files)
}
