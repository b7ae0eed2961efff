//! Subtitle parsing and per-segment lyric assignment.
//!
//! The song is split into equal-length windows, one per segment. A
//! subtitle cue belongs to the window that contains its midpoint.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;
use crate::types::SegmentId;

/// Text used for windows that contain no cue.
pub const INSTRUMENTAL_PLACEHOLDER: &str = "(Instrumental/Transition)";

static TIMING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}:\d{2}:\d{2},\d{3})\s*-->\s*(\d{2}:\d{2}:\d{2},\d{3})")
        .expect("valid regex")
});

static BLOCK_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// One timed subtitle cue, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Lyrics and clip length assigned to one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentLyrics {
    pub segment: SegmentId,
    pub start: f64,
    pub end: f64,
    /// Rounded window length in whole seconds.
    pub time: u32,
    pub lyrics: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Convert an SRT timestamp (`HH:MM:SS,mmm`) to seconds.
pub fn parse_timestamp(value: &str) -> Result<f64, CoreError> {
    let invalid = || CoreError::Parse(format!("Invalid SRT timestamp '{value}'"));

    let (clock, millis) = value.trim().split_once(',').ok_or_else(invalid)?;
    let mut parts = clock.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let h: u32 = h.parse().map_err(|_| invalid())?;
    let m: u32 = m.parse().map_err(|_| invalid())?;
    let s: u32 = s.parse().map_err(|_| invalid())?;
    let ms: u32 = millis.parse().map_err(|_| invalid())?;
    if m >= 60 || s >= 60 || millis.len() != 3 {
        return Err(invalid());
    }

    Ok(f64::from(h * 3600 + m * 60 + s) + f64::from(ms) / 1000.0)
}

/// Remove inline markup such as `<font color="...">` and trim.
pub fn strip_markup(text: &str) -> String {
    MARKUP_RE.replace_all(text, "").trim().to_string()
}

/// Parse SRT content into cues.
///
/// Blocks without a timing line are skipped. Multi-line cue text is
/// joined with single spaces. Cues whose text is empty after markup
/// removal are dropped.
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>, CoreError> {
    let normalized = content.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in BLOCK_SEPARATOR_RE.split(normalized.trim()) {
        let mut lines = block.lines().map(str::trim).skip_while(|l| l.is_empty());

        // Index line is optional in the wild; accept the timing line first.
        let Some(first) = lines.next() else { continue };
        let timing_line = if TIMING_RE.is_match(first) {
            first
        } else {
            match lines.next() {
                Some(line) if TIMING_RE.is_match(line) => line,
                _ => continue,
            }
        };

        let Some(caps) = TIMING_RE.captures(timing_line) else {
            continue;
        };
        let start = parse_timestamp(&caps[1])?;
        let end = parse_timestamp(&caps[2])?;

        let text = lines
            .map(strip_markup)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            continue;
        }

        cues.push(SubtitleCue { start, end, text });
    }

    Ok(cues)
}

// ---------------------------------------------------------------------------
// Segment assignment
// ---------------------------------------------------------------------------

/// Joined text of every cue whose midpoint lies in `[start, end)`.
///
/// Repeated lines are kept once, in first-seen order.
pub fn lyrics_for_window(cues: &[SubtitleCue], start: f64, end: f64) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for cue in cues {
        let mid = cue.midpoint();
        if start <= mid && mid < end && !seen.contains(&cue.text.as_str()) {
            seen.push(&cue.text);
        }
    }
    seen.join(" ")
}

/// Split a song of `total_secs` into `count` windows and assign lyrics.
pub fn plan_segment_lyrics(
    cues: &[SubtitleCue],
    total_secs: f64,
    count: u32,
) -> Result<Vec<SegmentLyrics>, CoreError> {
    if count == 0 {
        return Err(CoreError::Validation(
            "Segment count must be at least 1".to_string(),
        ));
    }
    if !total_secs.is_finite() || total_secs <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Song duration must be positive, got {total_secs}"
        )));
    }

    let window = total_secs / f64::from(count);
    let time = window.round() as u32;

    Ok((0..count)
        .map(|i| {
            let start = f64::from(i) * window;
            let end = f64::from(i + 1) * window;
            let lyrics = lyrics_for_window(cues, start, end);
            SegmentLyrics {
                segment: i + 1,
                start,
                end,
                time,
                lyrics: if lyrics.is_empty() {
                    INSTRUMENTAL_PLACEHOLDER.to_string()
                } else {
                    lyrics
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:03,000\n<font color=\"#fff\">First snow</font>\n\n\
                       2\n00:00:03,500 --> 00:00:05,000\nfalls on you\n\n\
                       3\n00:00:05,000 --> 00:00:06,000\nFirst snow\n\n\
                       4\n00:00:11,000 --> 00:00:15,000\nand I wait\n";

    #[test]
    fn timestamp_conversion() {
        assert_eq!(parse_timestamp("00:00:00,000").unwrap(), 0.0);
        assert_eq!(parse_timestamp("01:02:03,500").unwrap(), 3723.5);
        assert_matches!(parse_timestamp("1:2:3"), Err(CoreError::Parse(_)));
        assert_matches!(parse_timestamp("00:61:00,000"), Err(CoreError::Parse(_)));
        assert_matches!(parse_timestamp("00:00:00,5"), Err(CoreError::Parse(_)));
    }

    #[test]
    fn markup_is_stripped() {
        assert_eq!(strip_markup("  <i>hello</i> <b>there</b> "), "hello there");
    }

    #[test]
    fn parses_blocks_and_strips_markup() {
        let cues = parse_srt(SRT).unwrap();
        assert_eq!(cues.len(), 4);
        assert_eq!(cues[0].text, "First snow");
        assert_eq!(cues[0].start, 1.0);
        assert_eq!(cues[0].end, 3.0);
        assert_eq!(cues[3].text, "and I wait");
    }

    #[test]
    fn crlf_and_multiline_cues() {
        let srt = "1\r\n00:00:00,000 --> 00:00:02,000\r\nline one\r\nline two\r\n\r\n\
                   2\r\n00:00:02,000 --> 00:00:04,000\r\n<i></i>\r\n";
        let cues = parse_srt(srt).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "line one line two");
    }

    #[test]
    fn midpoint_decides_window() {
        let cues = parse_srt(SRT).unwrap();
        // Midpoints: 2.0, 4.25, 5.5, 13.0
        assert_eq!(lyrics_for_window(&cues, 0.0, 4.25), "First snow");
        assert_eq!(lyrics_for_window(&cues, 4.25, 10.0), "falls on you First snow");
    }

    #[test]
    fn repeated_lines_are_deduplicated_in_order() {
        let cues = parse_srt(SRT).unwrap();
        assert_eq!(lyrics_for_window(&cues, 0.0, 10.0), "First snow falls on you");
    }

    #[test]
    fn plan_covers_song_and_fills_gaps() {
        let cues = parse_srt(SRT).unwrap();
        let plan = plan_segment_lyrics(&cues, 16.0, 4).unwrap();

        assert_eq!(plan.len(), 4);
        assert_eq!(
            plan.iter().map(|s| s.segment).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(plan.iter().all(|s| s.time == 4));
        assert_eq!(plan[0].lyrics, "First snow");
        assert_eq!(plan[1].lyrics, "falls on you First snow");
        assert_eq!(plan[2].lyrics, INSTRUMENTAL_PLACEHOLDER);
        assert_eq!(plan[3].lyrics, "and I wait");
        assert_eq!(plan[3].end, 16.0);
    }

    #[test]
    fn plan_rounds_window_length() {
        let plan = plan_segment_lyrics(&[], 42.0, 8).unwrap();
        // 5.25 s windows round to 5.
        assert!(plan.iter().all(|s| s.time == 5));
    }

    #[test]
    fn plan_rejects_degenerate_inputs() {
        assert_matches!(plan_segment_lyrics(&[], 10.0, 0), Err(CoreError::Validation(_)));
        assert_matches!(plan_segment_lyrics(&[], 0.0, 8), Err(CoreError::Validation(_)));
        assert_matches!(
            plan_segment_lyrics(&[], f64::NAN, 8),
            Err(CoreError::Validation(_))
        );
    }
}
