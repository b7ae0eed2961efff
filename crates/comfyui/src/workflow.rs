//! Workflow template loading and per-job variable injection.
//!
//! A workflow is the API-format JSON graph: an object keyed by node id,
//! each node holding an `inputs` object. Only two nodes are touched per
//! job: the directive node (text + duration) and the input image node.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// Node ids that receive per-job values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowNodes {
    /// Node whose `prompt` and `duration` inputs carry the directive.
    pub prompt_node: String,
    /// Node whose `image` input names the uploaded start image.
    pub image_node: String,
}

impl Default for WorkflowNodes {
    fn default() -> Self {
        Self {
            prompt_node: "13".to_string(),
            image_node: "12".to_string(),
        }
    }
}

/// Errors loading or editing a workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow template not found or unreadable: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow template {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow has no node '{0}' with an inputs object")]
    MissingNode(String),

    #[error("Workflow root must be a JSON object")]
    NotAnObject,
}

/// A workflow graph being prepared for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    graph: Value,
}

impl Workflow {
    /// Wrap an already-parsed graph.
    pub fn from_value(graph: Value) -> Result<Self, WorkflowError> {
        if !graph.is_object() {
            return Err(WorkflowError::NotAnObject);
        }
        Ok(Self { graph })
    }

    /// Read and parse a template file.
    pub async fn load(path: &Path) -> Result<Self, WorkflowError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkflowError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let graph = serde_json::from_str(&text).map_err(|source| WorkflowError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(graph)
    }

    /// Set the directive text and clip duration.
    pub fn set_directive(
        &mut self,
        nodes: &WorkflowNodes,
        directive: &str,
        duration_secs: u32,
    ) -> Result<(), WorkflowError> {
        let inputs = self.inputs_mut(&nodes.prompt_node)?;
        inputs.insert("prompt".into(), Value::String(directive.to_string()));
        inputs.insert("duration".into(), Value::from(duration_secs));
        Ok(())
    }

    /// Point the image node at a server-side filename.
    pub fn set_image(&mut self, nodes: &WorkflowNodes, server_name: &str) -> Result<(), WorkflowError> {
        let inputs = self.inputs_mut(&nodes.image_node)?;
        inputs.insert("image".into(), Value::String(server_name.to_string()));
        Ok(())
    }

    pub fn as_value(&self) -> &Value {
        &self.graph
    }

    pub fn into_value(self) -> Value {
        self.graph
    }

    fn inputs_mut(
        &mut self,
        node_id: &str,
    ) -> Result<&mut serde_json::Map<String, Value>, WorkflowError> {
        self.graph
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| WorkflowError::MissingNode(node_id.to_string()))
    }
}
