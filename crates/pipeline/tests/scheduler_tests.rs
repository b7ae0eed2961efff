//! Wave scheduler behaviour against a scripted renderer that writes
//! artifacts into a scratch directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use noonsong_comfyui::job::{RenderError, RenderOutput};
use noonsong_core::segments::SegmentSelection;
use noonsong_core::types::SegmentId;
use noonsong_pipeline::artifacts::ArtifactDir;
use noonsong_pipeline::config::SchedulerConfig;
use noonsong_pipeline::scheduler::{JobOutcome, SchedulerError, SegmentRenderer, WaveScheduler};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    /// Return an execution error without writing anything.
    fail: HashSet<SegmentId>,
    /// Block until cancelled.
    hang: HashSet<SegmentId>,
    /// Write the artifact shortly after returning success.
    late: HashSet<SegmentId>,
    /// Write one extra artifact alongside the normal one.
    extra: HashSet<SegmentId>,
}

struct FakeRenderer {
    dir: PathBuf,
    script: Script,
    delay: Duration,
    run: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    saw_cancel: AtomicBool,
    /// (segment, artifacts on disk when the job started)
    starts: Mutex<Vec<(SegmentId, usize)>>,
}

impl FakeRenderer {
    fn new(dir: &Path, script: Script) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            script,
            delay: Duration::from_millis(20),
            run: AtomicUsize::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            saw_cancel: AtomicBool::new(false),
            starts: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<(SegmentId, usize)> {
        self.starts.lock().unwrap().clone()
    }

    fn artifact_name(&self, segment: SegmentId) -> String {
        let run = self.run.load(Ordering::SeqCst);
        format!("ByteDance-Seedance_{:05}_.mp4", run * 100 + segment as usize)
    }
}

#[async_trait]
impl SegmentRenderer for FakeRenderer {
    async fn render(
        &self,
        segment: SegmentId,
        cancel: CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        let on_disk = std::fs::read_dir(&self.dir).map(|d| d.count()).unwrap_or(0);
        self.starts.lock().unwrap().push((segment, on_disk));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.work(segment, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeRenderer {
    async fn work(
        &self,
        segment: SegmentId,
        cancel: CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        if self.script.hang.contains(&segment) {
            cancel.cancelled().await;
            self.saw_cancel.store(true, Ordering::SeqCst);
            return Err(RenderError::Cancelled {
                prompt_id: Some(format!("p-{segment}")),
            });
        }

        tokio::time::sleep(self.delay).await;

        if self.script.fail.contains(&segment) {
            return Err(RenderError::Execution {
                prompt_id: format!("p-{segment}"),
                node_id: "12".into(),
                message: "image not found".into(),
            });
        }

        let path = self.dir.join(self.artifact_name(segment));
        if self.script.late.contains(&segment) {
            let late_path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                tokio::fs::write(late_path, b"clip").await.unwrap();
            });
        } else {
            tokio::fs::write(&path, b"clip").await.unwrap();
        }
        if self.script.extra.contains(&segment) {
            let extra = self.dir.join(format!("extra_{segment}.mp4"));
            tokio::fs::write(extra, b"clip").await.unwrap();
        }

        Ok(RenderOutput {
            prompt_id: format!("p-{segment}"),
            remote_urls: vec![format!("http://render/view?filename={}", path.display())],
            local_paths: vec![path],
        })
    }
}

fn config(concurrency: usize, selection: SegmentSelection, timeout_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        concurrency,
        poll_interval: Duration::from_millis(25),
        wave_timeout: Duration::from_millis(timeout_ms),
        selection,
        artifact_extension: "mp4".into(),
    }
}

fn scheduler(
    renderer: &Arc<FakeRenderer>,
    config: SchedulerConfig,
) -> WaveScheduler<FakeRenderer> {
    let artifacts = ArtifactDir::new(renderer.dir.clone(), config.artifact_extension.clone());
    WaveScheduler::new(Arc::clone(renderer), artifacts, config)
}

// ---------------------------------------------------------------------------
// Wave ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eight_segments_render_in_two_confirmed_waves() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let out = dir.path().join("generated_videos");
    let renderer = FakeRenderer::new(&out, Script::default());
    let sched = scheduler(&renderer, config(4, SegmentSelection::default(), 2_000));

    let report = sched.run(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();

    assert_eq!(report.segments, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(report.waves.len(), 2);
    assert_eq!(report.waves[0].segments, vec![1, 2, 3, 4]);
    assert_eq!(report.waves[0].target, 4);
    assert_eq!(report.waves[1].segments, vec![5, 6, 7, 8]);
    assert_eq!(report.waves[1].target, 8);
    assert_eq!(report.artifact_count(), 8);
    assert!(report.failed_segments().is_empty());
    assert!(report.waves.iter().all(|w| w.jobs.iter().all(|j| j.outcome.is_success())));

    assert!(renderer.max_in_flight.load(Ordering::SeqCst) <= 4);
    for (segment, on_disk) in renderer.starts() {
        if segment > 4 {
            assert!(on_disk >= 4, "segment {segment} started with {on_disk} artifacts");
        } else {
            assert!(on_disk < 4, "segment {segment} started with {on_disk} artifacts");
        }
    }
}

#[tokio::test]
async fn canonical_selection_ignores_the_callers_list() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let renderer = FakeRenderer::new(&dir.path().join("out"), Script::default());
    let sched = scheduler(&renderer, config(4, SegmentSelection::Canonical { count: 8 }, 2_000));

    let report = sched.run(&[2, 3]).await.unwrap();

    assert_eq!(report.segments, (1..=8).collect::<Vec<_>>());
    assert_eq!(renderer.starts().len(), 8);
}

#[tokio::test]
async fn requested_selection_renders_exactly_the_given_segments() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let renderer = FakeRenderer::new(&dir.path().join("out"), Script::default());
    let sched = scheduler(&renderer, config(2, SegmentSelection::Requested, 2_000));

    let report = sched.run(&[2, 5, 7]).await.unwrap();

    let waves: Vec<(Vec<SegmentId>, usize)> = report
        .waves
        .iter()
        .map(|w| (w.segments.clone(), w.target))
        .collect();
    assert_eq!(waves, vec![(vec![2, 5], 2), (vec![7], 3)]);
    let mut started: Vec<SegmentId> = renderer.starts().iter().map(|(s, _)| *s).collect();
    started.sort_unstable();
    assert_eq!(started, vec![2, 5, 7]);
}

#[tokio::test]
async fn artifacts_landing_after_the_job_returns_are_waited_for() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        late: HashSet::from([2]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let sched = scheduler(&renderer, config(4, SegmentSelection::Canonical { count: 4 }, 2_000));

    let report = sched.run(&[]).await.unwrap();

    assert_eq!(report.waves.len(), 1);
    assert_eq!(report.waves[0].observed, 4);
}

// ---------------------------------------------------------------------------
// Failures and timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_job_leaves_siblings_running_and_times_out_the_wave() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        fail: HashSet::from([3]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let sched = scheduler(&renderer, config(4, SegmentSelection::default(), 300));

    let err = sched.run(&[]).await.unwrap_err();

    assert_matches!(
        err,
        SchedulerError::Timeout { wave: 1, expected: 4, observed: 3, ref failed, .. }
            if failed == &vec![3]
    );
    let started: HashSet<SegmentId> = renderer.starts().iter().map(|(s, _)| *s).collect();
    assert_eq!(started, HashSet::from([1, 2, 3, 4]));
}

#[tokio::test]
async fn wave_is_confirmed_by_count_even_when_a_job_failed() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        fail: HashSet::from([3]),
        extra: HashSet::from([1]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let sched = scheduler(&renderer, config(4, SegmentSelection::Canonical { count: 4 }, 1_000));

    let report = sched.run(&[]).await.unwrap();

    assert_eq!(report.failed_segments(), vec![3]);
    let failed = report.waves[0]
        .jobs
        .iter()
        .find(|j| j.segment == 3)
        .unwrap();
    assert_matches!(
        failed.outcome,
        JobOutcome::Failed { ref error } if error.contains("image not found")
    );
}

#[tokio::test]
async fn hung_job_is_cancelled_at_the_deadline() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        hang: HashSet::from([2]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let sched = scheduler(&renderer, config(4, SegmentSelection::default(), 300));

    let err = sched.run(&[]).await.unwrap_err();

    assert!(err.to_string().contains("after 300ms"), "{err}");
    assert_matches!(
        err,
        SchedulerError::Timeout { wave: 1, expected: 4, observed: 3, ref failed, .. }
            if failed == &vec![2]
    );
    assert!(renderer.saw_cancel.load(Ordering::SeqCst));
    assert!(renderer.starts().iter().all(|(s, _)| *s <= 4));
}

#[tokio::test]
async fn hung_job_does_not_fail_a_wave_whose_target_is_on_disk() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        hang: HashSet::from([2]),
        extra: HashSet::from([1]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let sched = scheduler(&renderer, config(4, SegmentSelection::Canonical { count: 4 }, 300));

    let report = sched.run(&[]).await.unwrap();

    assert_eq!(report.waves.len(), 1);
    assert_eq!(report.artifact_count(), 4);
    assert_eq!(report.failed_segments(), vec![2]);
    let hung = report.waves[0]
        .jobs
        .iter()
        .find(|j| j.segment == 2)
        .unwrap();
    assert_matches!(hung.outcome, JobOutcome::Cancelled);
    assert!(renderer.saw_cancel.load(Ordering::SeqCst));
}

#[tokio::test]
async fn external_cancellation_stops_the_run() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = Script {
        hang: HashSet::from([1, 2, 3, 4]),
        ..Default::default()
    };
    let renderer = FakeRenderer::new(&dir.path().join("out"), script);
    let token = CancellationToken::new();
    let sched = scheduler(&renderer, config(4, SegmentSelection::default(), 5_000))
        .with_cancellation(token.clone());

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = sched.run(&[]).await.unwrap_err();
    assert_matches!(err, SchedulerError::Cancelled { wave: 1 });
    assert!(renderer.saw_cancel.load(Ordering::SeqCst));
}

#[tokio::test]
async fn invalid_inputs_fail_before_anything_is_dispatched() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let renderer = FakeRenderer::new(&dir.path().join("out"), Script::default());

    let sched = scheduler(&renderer, config(4, SegmentSelection::Requested, 1_000));
    assert_matches!(sched.run(&[]).await, Err(SchedulerError::Setup(_)));
    assert_matches!(sched.run(&[1, 1]).await, Err(SchedulerError::Setup(_)));

    let sched = scheduler(&renderer, config(0, SegmentSelection::default(), 1_000));
    assert_matches!(sched.run(&[]).await, Err(SchedulerError::Setup(_)));

    assert!(renderer.starts().is_empty());
}

// ---------------------------------------------------------------------------
// Clean slate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_sees_only_its_own_artifacts() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("stale.mp4"), b"old").unwrap();

    let renderer = FakeRenderer::new(&out, Script::default());
    let sched = scheduler(&renderer, config(4, SegmentSelection::Canonical { count: 4 }, 2_000));

    sched.run(&[]).await.unwrap();
    let first = sched.artifacts().list().await.unwrap();
    assert_eq!(first.len(), 4);
    assert!(!first.iter().any(|p| p.ends_with("stale.mp4")));

    renderer.run.store(2, Ordering::SeqCst);
    let report = sched.run(&[]).await.unwrap();
    let second = sched.artifacts().list().await.unwrap();

    assert_eq!(report.artifact_count(), 4);
    assert_eq!(second.len(), 4);
    assert!(second.iter().all(|p| !first.contains(p)));
}
