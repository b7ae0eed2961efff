use std::collections::HashMap;
use std::path::PathBuf;

use assert_matches::assert_matches;
use noonsong_pipeline::config::PipelineConfig;
use noonsong_worker::{execute, merge, Command, WorkerError};
use tokio_util::sync::CancellationToken;

fn config_in(root: &std::path::Path) -> PipelineConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("COMFY_URL", "http://127.0.0.1:9".to_string()),
        ("WORK_DIR", root.display().to_string()),
        ("FINAL_OUTPUT", root.join("output.mp4").display().to_string()),
    ]);
    PipelineConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

#[test]
fn song_commands_take_subtitles_then_audio() {
    assert_eq!(
        Command::parse(["plan", "files/song.srt", "files/song.mp3"]).unwrap(),
        Command::Plan {
            subtitles: PathBuf::from("files/song.srt"),
            audio: PathBuf::from("files/song.mp3"),
        }
    );
    assert_matches!(
        Command::parse(["merge", "a.srt", "b.mp3"]).unwrap(),
        Command::Merge { .. }
    );
    assert_matches!(Command::parse(["all", "a.srt", "b.mp3"]).unwrap(), Command::All { .. });
}

#[test]
fn render_accepts_spaced_or_comma_separated_segments() {
    assert_eq!(
        Command::parse(["render", "1,2", "5"]).unwrap(),
        Command::Render {
            segments: vec![1, 2, 5]
        }
    );
    assert_eq!(
        Command::parse(["render"]).unwrap(),
        Command::Render { segments: vec![] }
    );
}

#[test]
fn bad_arguments_are_usage_errors() {
    assert_matches!(Command::parse(Vec::<String>::new()), Err(WorkerError::Usage(_)));
    assert_matches!(Command::parse(["plan", "only.srt"]), Err(WorkerError::Usage(_)));
    assert_matches!(Command::parse(["render", "two"]), Err(WorkerError::Usage(_)));
    assert_matches!(Command::parse(["deploy"]), Err(WorkerError::Usage(ref m)) if m.contains("deploy"));
    assert_eq!(Command::parse(["--help"]).unwrap(), Command::Help);
}

#[test]
fn usage_error_message_includes_usage() {
    let err = Command::parse(["nope"]).unwrap_err();
    assert!(err.to_string().contains("usage: noonsong-worker"));
}

// ---------------------------------------------------------------------------
// Stage wiring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn render_without_prompt_document_fails_setup() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = config_in(dir.path());
    let err = execute(
        Command::Render { segments: vec![] },
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, WorkerError::Setup(_));
}

#[tokio::test]
async fn merge_without_song_reports_missing_input() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = config_in(dir.path());
    let err = merge(&config, dir.path().join("song.srt"), dir.path().join("song.mp3"))
        .await
        .unwrap_err();
    assert_matches!(err, WorkerError::Merge(_));
}
