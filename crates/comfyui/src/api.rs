//! REST API client for the render service HTTP endpoints.
//!
//! Wraps image upload, workflow submission, queue deletion, history
//! retrieval, and output download using [`reqwest`].

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;

use crate::history::OutputFile;

/// HTTP client for a single render service.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    auth_token: Option<String>,
    api_key: Option<String>,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Server-side filename to reference from the workflow.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub file_type: String,
}

/// Response returned by `/prompt` after queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Render service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A local file to upload could not be read.
    #[error("Local file not found or unreadable: {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A URL could not be built from the configured base.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ComfyUIApi {
    /// Create a new API client.
    ///
    /// * `api_url`    - Base HTTP URL, e.g. `https://host`.
    /// * `auth_token` - Bearer token attached to every request.
    /// * `api_key`    - Key forwarded with submissions for paid nodes.
    pub fn new(api_url: &str, auth_token: Option<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, auth_token, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across concurrent jobs).
    pub fn with_client(
        client: reqwest::Client,
        api_url: &str,
        auth_token: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_token,
            api_key,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload a local image.
    ///
    /// Sends `POST /upload/image` as `multipart/form-data` with the file
    /// under `image`. Returns the server-side name to reference.
    pub async fn upload_image(
        &self,
        path: &Path,
        overwrite: bool,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ComfyUIApiError::LocalFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let form = Form::new()
            .part("image", Part::bytes(bytes).file_name(file_name))
            .text("overwrite", overwrite.to_string());

        let response = self
            .authorized(self.client.post(format!("{}/upload/image", self.api_url)))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow, the client id whose event
    /// stream should receive progress, and `extra_data` (the workflow
    /// itself for output metadata, plus the API key when configured).
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = submission_body(workflow, client_id, self.api_key.as_deref());

        let mut request = self.client.post(format!("{}/prompt", self.api_url));
        request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => self.authorized(request),
        };

        let response = request.json(&body).send().await?;
        Self::parse_response(response).await
    }

    /// Remove a queued or running prompt.
    ///
    /// Sends `POST /queue` with `{"delete": [prompt_id]}`.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .authorized(self.client.post(format!("{}/queue", self.api_url)))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. The returned JSON is keyed by
    /// prompt id and lists the outputs of every node.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/history/{}", self.api_url, prompt_id)),
            )
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download URL for an output file (`/view?filename&subfolder&type`).
    pub fn view_url(&self, output: &OutputFile) -> Result<Url, ComfyUIApiError> {
        Url::parse_with_params(
            &format!("{}/view", self.api_url),
            &[
                ("filename", output.filename.as_str()),
                ("subfolder", output.subfolder.as_str()),
                ("type", output.file_type.as_str()),
            ],
        )
        .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{}/view: {e}", self.api_url)))
    }

    /// Fetch the binary content at `url`.
    pub async fn download(&self, url: Url) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.authorized(self.client.get(url)).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// JSON body for `POST /prompt`.
pub fn submission_body(
    workflow: &serde_json::Value,
    client_id: &str,
    api_key: Option<&str>,
) -> serde_json::Value {
    let mut extra_data = serde_json::json!({
        "extra_pnginfo": { "workflow": workflow },
    });
    if let Some(key) = api_key {
        extra_data["api_key_comfy_org"] = serde_json::Value::String(key.to_string());
    }

    serde_json::json!({
        "prompt": workflow,
        "client_id": client_id,
        "extra_data": extra_data,
    })
}
