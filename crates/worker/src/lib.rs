//! Command-line stages of the Noonsong pipeline.
//!
//! `plan` writes the prompt document from a song's subtitles, `render`
//! runs the wave scheduler against the render service, `merge` joins the
//! clips with subtitles and audio, and `all` renders then merges.

use std::path::PathBuf;
use std::sync::Arc;

use noonsong_core::segments::DEFAULT_SEGMENT_COUNT;
use noonsong_core::types::SegmentId;
use noonsong_pipeline::artifacts::ArtifactDir;
use noonsong_pipeline::config::{ConfigError, PipelineConfig};
use noonsong_pipeline::merge::{merge_clips, MergeError, MergeOutput, MergeRequest};
use noonsong_pipeline::render::{ComfyRenderer, RendererSetupError};
use noonsong_pipeline::scheduler::{RunReport, SchedulerError, WaveScheduler};
use noonsong_pipeline::segment_plan::{write_segment_plan, PlanError};
use tokio_util::sync::CancellationToken;

pub const USAGE: &str = "\
usage: noonsong-worker <command>

commands:
  plan <subtitles.srt> <song.mp3>    write the prompt document
  render [segment ...]               render segments (default: every prompt entry)
  merge <subtitles.srt> <song.mp3>   join clips, burn in subtitles, add audio
  all <subtitles.srt> <song.mp3>     render, then merge";

/// One invocation of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Plan { subtitles: PathBuf, audio: PathBuf },
    Render { segments: Vec<SegmentId> },
    Merge { subtitles: PathBuf, audio: PathBuf },
    All { subtitles: PathBuf, audio: PathBuf },
    Help,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}\n\n{USAGE}")]
    Usage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render setup failed: {0}")]
    Setup(#[from] RendererSetupError),

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Render run failed: {0}")]
    Schedule(#[from] SchedulerError),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),
}

impl Command {
    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Result<Self, WorkerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let Some((name, rest)) = args.split_first() else {
            return Err(WorkerError::Usage("missing command".into()));
        };

        match name.as_str() {
            "plan" => song_inputs(name, rest).map(|(subtitles, audio)| Command::Plan { subtitles, audio }),
            "merge" => song_inputs(name, rest).map(|(subtitles, audio)| Command::Merge { subtitles, audio }),
            "all" => song_inputs(name, rest).map(|(subtitles, audio)| Command::All { subtitles, audio }),
            "render" => {
                let segments = rest
                    .iter()
                    .flat_map(|a| a.split(','))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<SegmentId>()
                            .map_err(|_| WorkerError::Usage(format!("invalid segment id '{s}'")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Command::Render { segments })
            }
            "help" | "-h" | "--help" => Ok(Command::Help),
            other => Err(WorkerError::Usage(format!("unknown command '{other}'"))),
        }
    }
}

fn song_inputs(command: &str, rest: &[String]) -> Result<(PathBuf, PathBuf), WorkerError> {
    match rest {
        [subtitles, audio] => Ok((PathBuf::from(subtitles), PathBuf::from(audio))),
        _ => Err(WorkerError::Usage(format!(
            "'{command}' takes <subtitles.srt> <song.mp3>"
        ))),
    }
}

/// Run `command`. Rendering stops early once `cancel` fires.
pub async fn execute(
    command: Command,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> Result<(), WorkerError> {
    match command {
        Command::Help => {
            println!("{USAGE}");
        }
        Command::Plan { subtitles, audio } => {
            let count = config.scheduler.selection.canonical_count().unwrap_or(DEFAULT_SEGMENT_COUNT);
            write_segment_plan(&subtitles, &audio, count, &config.prompt_document).await?;
        }
        Command::Render { segments } => {
            let report = render(config, &segments, cancel).await?;
            print_report(&report);
        }
        Command::Merge { subtitles, audio } => {
            merge(config, subtitles, audio).await?;
        }
        Command::All { subtitles, audio } => {
            let report = render(config, &[], cancel).await?;
            print_report(&report);
            merge(config, subtitles, audio).await?;
        }
    }
    Ok(())
}

/// Render `requested` segments, or every prompt entry when empty.
pub async fn render(
    config: &PipelineConfig,
    requested: &[SegmentId],
    cancel: CancellationToken,
) -> Result<RunReport, WorkerError> {
    let renderer = ComfyRenderer::from_config(config)?;
    let requested = if requested.is_empty() {
        renderer.segments()
    } else {
        requested.to_vec()
    };

    let artifacts = ArtifactDir::new(
        config.output_dir.clone(),
        config.scheduler.artifact_extension.clone(),
    );
    let scheduler = WaveScheduler::new(Arc::new(renderer), artifacts, config.scheduler.clone())
        .with_cancellation(cancel);
    Ok(scheduler.run(&requested).await?)
}

pub async fn merge(
    config: &PipelineConfig,
    subtitles: PathBuf,
    audio: PathBuf,
) -> Result<MergeOutput, WorkerError> {
    let request = MergeRequest {
        artifacts: ArtifactDir::new(
            config.output_dir.clone(),
            config.scheduler.artifact_extension.clone(),
        ),
        prefix: config.artifact_prefix.clone(),
        work_dir: config.work_dir.clone(),
        subtitles,
        audio,
        output: config.final_output.clone(),
    };
    let output = merge_clips(&request).await?;
    tracing::info!(
        clips = output.clips.len(),
        output = %output.output.display(),
        "Final video written",
    );
    Ok(output)
}

fn print_report(report: &RunReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Could not serialize run report"),
    }
}
