//! [`SegmentRenderer`] backed by a ComfyUI render service.

use std::path::PathBuf;

use async_trait::async_trait;
use noonsong_comfyui::api::ComfyUIApi;
use noonsong_comfyui::client::{ComfyUIClient, ComfyUIClientError};
use noonsong_comfyui::job::{JobRunner, RenderError, RenderJob, RenderOutput};
use noonsong_core::error::CoreError;
use noonsong_core::prompts::PromptDocument;
use noonsong_core::segments::select_rotating;
use noonsong_core::types::SegmentId;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::scheduler::SegmentRenderer;

/// Errors assembling a [`ComfyRenderer`].
#[derive(Debug, thiserror::Error)]
pub enum RendererSetupError {
    #[error("Cannot read prompt document: {0}")]
    Prompts(#[from] CoreError),

    #[error("Invalid render service URL: {0}")]
    Client(#[from] ComfyUIClientError),

    #[error("Image pool is empty")]
    EmptyImagePool,
}

/// Turns a segment id into a [`RenderJob`] and runs it.
///
/// The directive and duration come from the prompt document. The start
/// image rotates through the pool by segment id.
#[derive(Debug)]
pub struct ComfyRenderer {
    runner: JobRunner,
    prompts: PromptDocument,
    image_pool: Vec<PathBuf>,
}

impl ComfyRenderer {
    pub fn new(
        runner: JobRunner,
        prompts: PromptDocument,
        image_pool: Vec<PathBuf>,
    ) -> Result<Self, RendererSetupError> {
        if image_pool.is_empty() {
            return Err(RendererSetupError::EmptyImagePool);
        }
        Ok(Self {
            runner,
            prompts,
            image_pool,
        })
    }

    /// Wire a renderer from configuration, loading the prompt document.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RendererSetupError> {
        let prompts = PromptDocument::load(&config.prompt_document)?;
        let client = ComfyUIClient::new(&config.service.url, config.service.auth_token.clone())?;
        let api = ComfyUIApi::new(
            &config.service.url,
            config.service.auth_token.clone(),
            config.service.api_key.clone(),
        );
        let runner = JobRunner::new(
            client,
            api,
            config.workflow_template.clone(),
            config.output_dir.clone(),
        )
        .with_workflow_dir(config.workflow_dir.clone());

        tracing::info!(
            prompts = prompts.len(),
            images = config.image_pool.len(),
            service = %config.service.url,
            "Render client ready",
        );
        Self::new(runner, prompts, config.image_pool.clone())
    }

    /// Segments that have a prompt entry, in document order.
    pub fn segments(&self) -> Vec<SegmentId> {
        self.prompts.segments()
    }

    /// Build the job for `segment`.
    pub fn job_for(&self, segment: SegmentId) -> Result<RenderJob, RenderError> {
        let entry = self
            .prompts
            .find(segment)
            .map_err(|_| RenderError::MissingPrompt { segment })?;
        let image = select_rotating(&self.image_pool, segment)
            .cloned()
            .ok_or(RenderError::MissingPrompt { segment })?;
        Ok(RenderJob {
            segment,
            directive: entry.prompt.clone(),
            duration_secs: entry.time,
            image,
        })
    }
}

#[async_trait]
impl SegmentRenderer for ComfyRenderer {
    async fn render(
        &self,
        segment: SegmentId,
        cancel: CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        let job = self.job_for(segment)?;
        self.runner.submit_and_await(&job, &cancel).await
    }
}
