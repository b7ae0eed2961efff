//! Thin wrappers around the `ffmpeg` and `ffprobe` binaries.

use std::ffi::OsStr;
use std::path::Path;

use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(#[source] std::io::Error),

    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        tool: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("media file not found: {0}")]
    FileNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Duration of an audio or video file in seconds.
pub async fn probe_duration(path: &Path) -> Result<f64, MediaError> {
    if tokio::fs::metadata(path).await.is_err() {
        return Err(MediaError::FileNotFound(path.display().to_string()));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .output()
        .await
        .map_err(MediaError::NotFound)?;

    if !output.status.success() {
        return Err(MediaError::ExecutionFailed {
            tool: "ffprobe",
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Extract `format.duration` from ffprobe JSON.
pub fn parse_duration(stdout: &str) -> Result<f64, MediaError> {
    let probe: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| MediaError::ParseError(format!("{e}: {stdout}")))?;
    let raw = probe
        .format
        .duration
        .ok_or_else(|| MediaError::ParseError("no format.duration in ffprobe output".into()))?;
    raw.parse::<f64>()
        .map_err(|e| MediaError::ParseError(format!("duration '{raw}': {e}")))
}

/// Run `ffmpeg` with `args`, failing with its stderr on a non-zero exit.
pub async fn run_ffmpeg<I, S>(args: I) -> Result<(), MediaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new("ffmpeg")
        .args(args)
        .output()
        .await
        .map_err(MediaError::NotFound)?;

    if !output.status.success() {
        return Err(MediaError::ExecutionFailed {
            tool: "ffmpeg",
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}
