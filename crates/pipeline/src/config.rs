//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use noonsong_core::assembly::{DEFAULT_ARTIFACT_EXTENSION, DEFAULT_ARTIFACT_PREFIX};
use noonsong_core::segments::{SegmentSelection, DEFAULT_CONCURRENCY_LIMIT};

/// Default seconds between artifact-count checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default ceiling on one wave, dispatch plus polling.
pub const DEFAULT_WAVE_TIMEOUT_SECS: u64 = 600;

/// Errors reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the render service lives and how to authenticate.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP base URL, e.g. `https://cloud.example.com`.
    pub url: String,
    /// Bearer token attached to every request.
    pub auth_token: Option<String>,
    /// Key forwarded on submissions.
    pub api_key: Option<String>,
}

/// Wave scheduling parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs per wave (K).
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub wave_timeout: Duration,
    pub selection: SegmentSelection,
    /// Files with this extension count as artifacts.
    pub artifact_extension: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            wave_timeout: Duration::from_secs(DEFAULT_WAVE_TIMEOUT_SECS),
            selection: SegmentSelection::default(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
        }
    }
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub service: ServiceConfig,
    /// Per-run working area.
    pub work_dir: PathBuf,
    /// Shared artifact directory, cleared at the start of each render.
    pub output_dir: PathBuf,
    pub prompt_document: PathBuf,
    pub workflow_template: PathBuf,
    /// Prepared workflows are kept here while their jobs run.
    pub workflow_dir: PathBuf,
    /// Start images, assigned to segments round-robin.
    pub image_pool: Vec<PathBuf>,
    pub scheduler: SchedulerConfig,
    /// Filename prefix of rendered clips, used to order them for merging.
    pub artifact_prefix: String,
    /// Final merged video.
    pub final_output: PathBuf,
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var              | Default                                  |
    /// |----------------------|------------------------------------------|
    /// | `COMFY_URL`          | required                                 |
    /// | `COMFY_AUTH_TOKEN`   | unset                                    |
    /// | `COMFY_API_KEY`      | unset                                    |
    /// | `WORK_DIR`           | `files`                                  |
    /// | `OUTPUT_DIR`         | `$WORK_DIR/generated_videos`             |
    /// | `PROMPT_DOCUMENT`    | `$WORK_DIR/video_prompt.json`            |
    /// | `WORKFLOW_TEMPLATE`  | `assets/video_workflow_api.json`         |
    /// | `IMAGE_POOL`         | `images/nunsong_variation_{1..4}.png`    |
    /// | `CONCURRENCY_LIMIT`  | `4`                                      |
    /// | `POLL_INTERVAL_SECS` | `5`                                      |
    /// | `WAVE_TIMEOUT_SECS`  | `600`                                    |
    /// | `SEGMENT_SELECTION`  | `canonical:8`                            |
    /// | `ARTIFACT_EXTENSION` | `mp4`                                    |
    /// | `ARTIFACT_PREFIX`    | `ByteDance-Seedance`                     |
    /// | `FINAL_OUTPUT`       | `output.mp4`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let url = get("COMFY_URL").ok_or(ConfigError::Missing("COMFY_URL"))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "COMFY_URL",
                value: url,
                reason: "must start with http:// or https://".into(),
            });
        }
        let service = ServiceConfig {
            url,
            auth_token: get("COMFY_AUTH_TOKEN"),
            api_key: get("COMFY_API_KEY"),
        };

        let work_dir = PathBuf::from(get("WORK_DIR").unwrap_or_else(|| "files".into()));
        let output_dir = get("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("generated_videos"));
        let prompt_document = get("PROMPT_DOCUMENT")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("video_prompt.json"));
        let workflow_template = PathBuf::from(
            get("WORKFLOW_TEMPLATE").unwrap_or_else(|| "assets/video_workflow_api.json".into()),
        );
        let workflow_dir = work_dir.join("workflows");

        let image_pool: Vec<PathBuf> = match get("IMAGE_POOL") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => (1..=4)
                .map(|i| PathBuf::from(format!("images/nunsong_variation_{i}.png")))
                .collect(),
        };
        if image_pool.is_empty() {
            return Err(ConfigError::Invalid {
                var: "IMAGE_POOL",
                value: String::new(),
                reason: "at least one image is required".into(),
            });
        }

        let concurrency: usize = parse_or(&get, "CONCURRENCY_LIMIT", DEFAULT_CONCURRENCY_LIMIT)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "CONCURRENCY_LIMIT",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let poll_secs: u64 = parse_or(&get, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let timeout_secs: u64 = parse_or(&get, "WAVE_TIMEOUT_SECS", DEFAULT_WAVE_TIMEOUT_SECS)?;

        let selection = match get("SEGMENT_SELECTION") {
            Some(value) => value.parse::<SegmentSelection>().map_err(|e| {
                ConfigError::Invalid {
                    var: "SEGMENT_SELECTION",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => SegmentSelection::default(),
        };

        let scheduler = SchedulerConfig {
            concurrency,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            wave_timeout: Duration::from_secs(timeout_secs),
            selection,
            artifact_extension: get("ARTIFACT_EXTENSION")
                .map(|e| e.trim_start_matches('.').to_string())
                .unwrap_or_else(|| DEFAULT_ARTIFACT_EXTENSION.to_string()),
        };

        Ok(Self {
            service,
            work_dir,
            output_dir,
            prompt_document,
            workflow_template,
            workflow_dir,
            image_pool,
            scheduler,
            artifact_prefix: get("ARTIFACT_PREFIX")
                .unwrap_or_else(|| DEFAULT_ARTIFACT_PREFIX.to_string()),
            final_output: PathBuf::from(get("FINAL_OUTPUT").unwrap_or_else(|| "output.mp4".into())),
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
