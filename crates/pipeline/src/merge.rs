//! Join rendered clips into the final music video.
//!
//! Two ffmpeg passes: a stream-copy concat of the ordered clips, then a
//! re-encode that burns in the subtitles and maps the song as the only
//! audio track.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use noonsong_core::assembly::{concat_list, order_artifacts, ArtifactNamePattern};
use noonsong_core::error::CoreError;

use crate::artifacts::ArtifactDir;
use crate::media::{run_ffmpeg, MediaError};

const CONCAT_LIST_NAME: &str = "concat_list.txt";
const MERGED_NAME: &str = "merged_temp.mp4";
const SUBTITLE_STYLE: &str = "Alignment=2,FontSize=12";

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Merge input not found: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Everything one merge needs.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub artifacts: ArtifactDir,
    /// Clip filename prefix used for ordering.
    pub prefix: String,
    /// Where the concat list and intermediate file go.
    pub work_dir: PathBuf,
    pub subtitles: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Clips in the order they were joined.
    pub clips: Vec<PathBuf>,
    pub output: PathBuf,
}

/// Order the clips, concat them, then add subtitles and audio.
pub async fn merge_clips(request: &MergeRequest) -> Result<MergeOutput, MergeError> {
    let subtitles = absolute_input(&request.subtitles).await?;
    let audio = absolute_input(&request.audio).await?;

    let pattern = ArtifactNamePattern::new(&request.prefix, request.artifacts.extension())?;
    let listed = request.artifacts.list().await?;
    let ordered = order_artifacts(&listed, &pattern)?;

    let mut clips = Vec::with_capacity(ordered.len());
    for clip in &ordered {
        clips.push(absolute_input(clip).await?);
    }

    tokio::fs::create_dir_all(&request.work_dir)
        .await
        .map_err(|e| CoreError::io(&request.work_dir, e))?;
    let list_path = request.work_dir.join(CONCAT_LIST_NAME);
    tokio::fs::write(&list_path, concat_list(&clips))
        .await
        .map_err(|e| CoreError::io(&list_path, e))?;
    let merged = request.work_dir.join(MERGED_NAME);

    tracing::info!(clips = clips.len(), list = %list_path.display(), "Concatenating clips");
    run_ffmpeg(concat_args(&list_path, &merged)).await?;

    tracing::info!(output = %request.output.display(), "Adding subtitles and audio");
    run_ffmpeg(mux_args(&merged, &audio, &subtitles, &request.output)).await?;

    Ok(MergeOutput {
        clips,
        output: request.output.clone(),
    })
}

/// `ffmpeg` arguments for the stream-copy concat pass.
pub fn concat_args(list: &Path, merged: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(list.into());
    args.extend(["-c", "copy"].map(OsString::from));
    args.push(merged.into());
    args
}

/// `ffmpeg` arguments for the subtitle burn-in and audio mux pass.
pub fn mux_args(merged: &Path, audio: &Path, subtitles: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), merged.into(), "-i".into(), audio.into()];
    args.push("-vf".into());
    args.push(subtitle_filter(subtitles).into());
    args.extend(
        ["-map", "0:v", "-map", "1:a", "-c:v", "libx264", "-c:a", "aac", "-b:a", "192k"]
            .map(OsString::from),
    );
    args.push(output.into());
    args
}

/// The `subtitles=` video filter for `path`, single-quoted.
pub fn subtitle_filter(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("subtitles='{escaped}':force_style='{SUBTITLE_STYLE}'")
}

async fn absolute_input(path: &Path) -> Result<PathBuf, MergeError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|_| MergeError::MissingInput {
            path: path.to_path_buf(),
        })
}
