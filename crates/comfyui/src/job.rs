//! One render job, end to end.
//!
//! [`JobRunner::submit_and_await`] runs the full protocol for a single
//! segment: prepare the workflow, upload the start image, open the event
//! stream, submit, wait for the terminal event, close the stream, then
//! download every declared output into the shared output directory.

use std::path::{Path, PathBuf};

use noonsong_core::types::SegmentId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::history::{parse_outputs, HistoryError, OutputFile};
use crate::stream::{await_completion, StreamOutcome};
use crate::workflow::{Workflow, WorkflowError, WorkflowNodes};

/// Inputs for one segment's render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub segment: SegmentId,
    /// Textual directive for the video model.
    pub directive: String,
    /// Clip length in seconds.
    pub duration_secs: u32,
    /// Local start image to upload.
    pub image: PathBuf,
}

/// What a finished job produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderOutput {
    pub prompt_id: String,
    /// `/view` URLs of every declared output.
    pub remote_urls: Vec<String>,
    /// Files written into the output directory.
    pub local_paths: Vec<PathBuf>,
}

/// Job-level failures. Each variant carries enough context to diagnose
/// the job without the remote service's logs.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Input image not found: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error("No prompt entry for segment {segment}")]
    MissingPrompt { segment: SegmentId },

    #[error("Workflow template error: {0}")]
    Template(#[from] WorkflowError),

    #[error("Image upload failed: {0}")]
    Upload(#[source] ComfyUIApiError),

    #[error("Event stream connection failed: {0}")]
    Connection(#[source] ComfyUIClientError),

    #[error("Workflow submission failed: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error("Event stream failed for prompt {prompt_id}: {source}")]
    Stream {
        prompt_id: String,
        #[source]
        source: ComfyUIClientError,
    },

    #[error("Prompt {prompt_id} failed on node {node_id}: {message}")]
    Execution {
        prompt_id: String,
        node_id: String,
        message: String,
    },

    #[error("Prompt {prompt_id} was interrupted")]
    Interrupted { prompt_id: String },

    #[error("Render cancelled{}", cancelled_suffix(.prompt_id))]
    Cancelled { prompt_id: Option<String> },

    #[error("History lookup failed for prompt {prompt_id}: {source}")]
    History {
        prompt_id: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Output manifest unreadable: {0}")]
    Manifest(#[from] HistoryError),
}

fn cancelled_suffix(prompt_id: &Option<String>) -> String {
    prompt_id
        .as_deref()
        .map(|id| format!(" (prompt {id})"))
        .unwrap_or_default()
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled { .. })
    }
}

/// Runs render jobs against one service.
///
/// Cheap to share behind an `Arc`; every job opens its own event stream.
#[derive(Debug, Clone)]
pub struct JobRunner {
    client: ComfyUIClient,
    api: ComfyUIApi,
    template_path: PathBuf,
    nodes: WorkflowNodes,
    output_dir: PathBuf,
    workflow_dir: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(
        client: ComfyUIClient,
        api: ComfyUIApi,
        template_path: PathBuf,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            api,
            template_path,
            nodes: WorkflowNodes::default(),
            output_dir,
            workflow_dir: None,
        }
    }

    /// Override the node ids that receive per-job values.
    pub fn with_nodes(mut self, nodes: WorkflowNodes) -> Self {
        self.nodes = nodes;
        self
    }

    /// Keep a copy of each prepared workflow in `dir` while its job runs.
    pub fn with_workflow_dir(mut self, dir: PathBuf) -> Self {
        self.workflow_dir = Some(dir);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run `job` to completion and download its outputs.
    pub async fn submit_and_await(
        &self,
        job: &RenderJob,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled { prompt_id: None });
        }
        if tokio::fs::metadata(&job.image).await.is_err() {
            return Err(RenderError::MissingInput {
                path: job.image.clone(),
            });
        }

        let mut workflow = Workflow::load(&self.template_path).await?;
        workflow.set_directive(&self.nodes, &job.directive, job.duration_secs)?;

        tracing::info!(
            segment = job.segment,
            image = %job.image.display(),
            duration_secs = job.duration_secs,
            "Uploading start image",
        );
        let upload = self
            .api
            .upload_image(&job.image, true)
            .await
            .map_err(RenderError::Upload)?;
        workflow.set_image(&self.nodes, &upload.name)?;

        let dump = self.dump_workflow(job.segment, &workflow).await;
        let result = self.execute(job.segment, &workflow, cancel).await;
        if let Some(path) = dump {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove prepared workflow");
            }
        }
        result
    }

    /// Steps 4-9: stream, submit, wait, close, download.
    async fn execute(
        &self,
        segment: SegmentId,
        workflow: &Workflow,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        let mut conn = self
            .client
            .connect()
            .await
            .map_err(RenderError::Connection)?;

        let submitted = self
            .api
            .submit_workflow(workflow.as_value(), &conn.client_id)
            .await;
        let prompt_id = match submitted {
            Ok(resp) => resp.prompt_id,
            Err(e) => {
                close_stream(&mut conn.ws_stream, segment).await;
                return Err(RenderError::Submit(e));
            }
        };
        tracing::info!(segment, prompt_id = %prompt_id, client_id = %conn.client_id, "Prompt queued");

        let outcome = await_completion(&mut conn.ws_stream, &prompt_id, cancel).await;
        close_stream(&mut conn.ws_stream, segment).await;

        match outcome {
            Ok(StreamOutcome::Completed) => {}
            Ok(StreamOutcome::Failed(data)) => {
                return Err(RenderError::Execution {
                    prompt_id,
                    node_id: data.node_id.unwrap_or_else(|| "?".to_string()),
                    message: data.exception_message,
                });
            }
            Ok(StreamOutcome::Interrupted) => {
                return Err(RenderError::Interrupted { prompt_id });
            }
            Ok(StreamOutcome::Cancelled) => {
                if let Err(e) = self.api.cancel_execution(&prompt_id).await {
                    tracing::warn!(segment, prompt_id = %prompt_id, error = %e, "Failed to drop cancelled prompt from remote queue");
                }
                return Err(RenderError::Cancelled {
                    prompt_id: Some(prompt_id),
                });
            }
            Err(source) => return Err(RenderError::Stream { prompt_id, source }),
        }

        let history = self
            .api
            .get_history(&prompt_id)
            .await
            .map_err(|source| RenderError::History {
                prompt_id: prompt_id.clone(),
                source,
            })?;
        let outputs = parse_outputs(&history, &prompt_id)?;

        let mut result = RenderOutput {
            prompt_id,
            ..Default::default()
        };
        for output in &outputs {
            self.fetch_output(segment, output, &mut result).await;
        }

        tracing::info!(
            segment,
            prompt_id = %result.prompt_id,
            declared = outputs.len(),
            saved = result.local_paths.len(),
            "Render job finished",
        );
        Ok(result)
    }

    /// Download one declared output. Failures are logged and skipped.
    async fn fetch_output(&self, segment: SegmentId, output: &OutputFile, result: &mut RenderOutput) {
        let url = match self.api.view_url(output) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(segment, filename = %output.filename, error = %e, "Cannot build download URL");
                return;
            }
        };
        result.remote_urls.push(url.to_string());

        let Some(name) = Path::new(&output.filename).file_name() else {
            tracing::warn!(segment, filename = %output.filename, "Output has no usable file name");
            return;
        };
        let local_path = self.output_dir.join(name);

        let bytes = match self.api.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(segment, filename = %output.filename, error = %e, "Output download failed");
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            tracing::warn!(segment, dir = %self.output_dir.display(), error = %e, "Cannot create output directory");
            return;
        }
        match tokio::fs::write(&local_path, &bytes).await {
            Ok(()) => {
                tracing::info!(segment, kind = ?output.kind, path = %local_path.display(), "Saved output");
                result.local_paths.push(local_path);
            }
            Err(e) => {
                tracing::warn!(segment, path = %local_path.display(), error = %e, "Failed to write output");
            }
        }
    }

    /// Write the prepared workflow for inspection. Best effort.
    async fn dump_workflow(&self, segment: SegmentId, workflow: &Workflow) -> Option<PathBuf> {
        let dir = self.workflow_dir.as_ref()?;
        let path = prepared_workflow_path(dir, segment);
        let write = async {
            tokio::fs::create_dir_all(dir).await?;
            let json = serde_json::to_vec_pretty(workflow.as_value()).map_err(std::io::Error::other)?;
            tokio::fs::write(&path, json).await?;
            Ok::<(), std::io::Error>(())
        };
        match write.await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::debug!(segment, path = %path.display(), error = %e, "Could not write prepared workflow");
                None
            }
        }
    }
}

/// Where the prepared workflow for `segment` is kept while its job runs.
pub fn prepared_workflow_path(dir: &Path, segment: SegmentId) -> PathBuf {
    dir.join(format!("segment_{segment}.json"))
}

async fn close_stream(ws: &mut crate::client::EventStream, segment: SegmentId) {
    if let Err(e) = ws.close(None).await {
        tracing::debug!(segment, error = %e, "Event stream close failed");
    }
}
