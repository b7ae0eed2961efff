//! Build the prompt document from a song's subtitles.
//!
//! The song is split into equal windows, one per segment, and each window
//! gets the lyrics whose cues fall inside it. The directive written here is
//! a provisional one derived from the lyrics; it can be replaced with a
//! hand-written or generated directive before rendering.

use std::path::{Path, PathBuf};

use noonsong_core::error::CoreError;
use noonsong_core::prompts::{PromptDocument, SegmentPrompt};
use noonsong_core::subtitles::{parse_srt, plan_segment_lyrics, SegmentLyrics};

use crate::media::{probe_duration, MediaError};

/// Visual style appended to every provisional directive.
pub const THEME_STYLE: &str = "Cinematic lighting, high fidelity, fluid motion, \
consistent character details, slight volumetric fog";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Subtitle file unreadable: {}: {source}", .path.display())]
    Subtitles {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Cannot determine song duration: {0}")]
    Duration(#[from] MediaError),
}

/// Provisional directive for one window.
pub fn provisional_directive(lyrics: &SegmentLyrics) -> String {
    format!(
        "Expressive movement and camera work interpreting \"{}\" over {} seconds, {}",
        lyrics.lyrics, lyrics.time, THEME_STYLE
    )
}

/// Plan `count` segments from subtitle text and a song duration.
pub fn plan_document(
    srt: &str,
    total_secs: f64,
    count: u32,
) -> Result<PromptDocument, CoreError> {
    let cues = parse_srt(srt)?;
    let windows = plan_segment_lyrics(&cues, total_secs, count)?;
    Ok(PromptDocument::new(
        windows
            .iter()
            .map(|w| SegmentPrompt {
                segment: w.segment,
                time: w.time,
                prompt: provisional_directive(w),
                lyrics: Some(w.lyrics.clone()),
            })
            .collect(),
    ))
}

/// Read the subtitles, probe the song, and write the prompt document.
pub async fn write_segment_plan(
    subtitles: &Path,
    audio: &Path,
    count: u32,
    destination: &Path,
) -> Result<PromptDocument, PlanError> {
    let srt = tokio::fs::read_to_string(subtitles)
        .await
        .map_err(|source| PlanError::Subtitles {
            path: subtitles.to_path_buf(),
            source,
        })?;
    let total_secs = probe_duration(audio).await?;
    tracing::info!(
        audio = %audio.display(),
        total_secs,
        window_secs = total_secs / f64::from(count.max(1)),
        "Planning segments",
    );

    let document = plan_document(&srt, total_secs, count)?;
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::io(parent, e))?;
    }
    document.save(destination)?;
    tracing::info!(
        segments = document.len(),
        path = %destination.display(),
        "Prompt document written",
    );
    Ok(document)
}
