//! Wave scheduler.
//!
//! Renders a segment list in consecutive waves of at most K concurrent
//! jobs. After every job in a wave has returned, the shared output
//! directory is polled until it holds at least the wave's accumulated
//! artifact target. Only then is the next wave dispatched. A wave that
//! does not reach its target before the deadline fails the whole run.
//!
//! Individual job failures never abort siblings; they are recorded in the
//! [`WaveReport`] and the directory count decides whether the run goes on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use noonsong_comfyui::job::{RenderError, RenderOutput};
use noonsong_core::error::CoreError;
use noonsong_core::segments::{plan_waves, Wave};
use noonsong_core::types::{SegmentId, Timestamp};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactDir;
use crate::config::SchedulerConfig;

/// How long cancelled jobs get to wind down before they are aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Renderer seam
// ---------------------------------------------------------------------------

/// Renders one segment into the shared output directory.
///
/// Implementations must stop waiting on remote work once `cancel` fires.
#[async_trait]
pub trait SegmentRenderer: Send + Sync + 'static {
    async fn render(
        &self,
        segment: SegmentId,
        cancel: CancellationToken,
    ) -> Result<RenderOutput, RenderError>;
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How one job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { prompt_id: String, files: usize },
    Failed { error: String },
    /// Stopped through the wave's cancellation token.
    Cancelled,
    /// Still running at the deadline and aborted, or panicked.
    Aborted,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub segment: SegmentId,
    pub outcome: JobOutcome,
    pub finished_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    /// One-based wave number.
    pub wave: usize,
    pub segments: Vec<SegmentId>,
    pub target: usize,
    /// Artifacts counted when the wave was confirmed.
    pub observed: usize,
    /// Per-job results, in completion order.
    pub jobs: Vec<JobReport>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl WaveReport {
    /// Segments whose job did not succeed, ascending.
    pub fn failed_segments(&self) -> Vec<SegmentId> {
        let mut failed: Vec<SegmentId> = self
            .jobs
            .iter()
            .filter(|j| !j.outcome.is_success())
            .map(|j| j.segment)
            .collect();
        failed.sort_unstable();
        failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Segments the run rendered, after selection.
    pub segments: Vec<SegmentId>,
    pub waves: Vec<WaveReport>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl RunReport {
    /// Artifacts on disk when the last wave was confirmed.
    pub fn artifact_count(&self) -> usize {
        self.waves.last().map(|w| w.observed).unwrap_or(0)
    }

    pub fn failed_segments(&self) -> Vec<SegmentId> {
        self.waves.iter().flat_map(|w| w.failed_segments()).collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Bad segment list or limit, or the output directory could not be
    /// prepared or read.
    #[error(transparent)]
    Setup(#[from] CoreError),

    /// A wave did not produce its artifacts in time. Fatal, not retried.
    #[error(
        "Wave {wave} timed out after {timeout:?}: expected {expected} artifacts, found {observed} (failed segments: {failed:?})"
    )]
    Timeout {
        wave: usize,
        expected: usize,
        observed: usize,
        timeout: Duration,
        failed: Vec<SegmentId>,
    },

    /// The run's cancellation token fired.
    #[error("Run cancelled during wave {wave}")]
    Cancelled { wave: usize },
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct WaveScheduler<R> {
    renderer: Arc<R>,
    artifacts: ArtifactDir,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl<R: SegmentRenderer> WaveScheduler<R> {
    pub fn new(renderer: Arc<R>, artifacts: ArtifactDir, config: SchedulerConfig) -> Self {
        Self {
            renderer,
            artifacts,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` as the parent of every wave's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn artifacts(&self) -> &ArtifactDir {
        &self.artifacts
    }

    /// Render `requested` (subject to the configured selection policy).
    ///
    /// Clears the output directory first, so a run never sees artifacts
    /// from an earlier one.
    pub async fn run(&self, requested: &[SegmentId]) -> Result<RunReport, SchedulerError> {
        let selection = self.config.selection;
        if selection.overrides(requested) {
            tracing::info!(
                requested = ?requested,
                selection = %selection,
                "Segment selection policy overrides the requested segments",
            );
        }
        let segments = selection.resolve(requested)?;
        let waves = plan_waves(&segments, self.config.concurrency)?;

        self.artifacts.reset().await?;

        let started_at = Utc::now();
        tracing::info!(
            segments = segments.len(),
            waves = waves.len(),
            concurrency = self.config.concurrency,
            "Starting render run",
        );

        let mut reports = Vec::with_capacity(waves.len());
        for wave in &waves {
            reports.push(self.run_wave(wave).await?);
        }

        let report = RunReport {
            segments,
            waves: reports,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            artifacts = report.artifact_count(),
            failed = ?report.failed_segments(),
            "Render run complete",
        );
        Ok(report)
    }

    async fn run_wave(&self, wave: &Wave) -> Result<WaveReport, SchedulerError> {
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.wave_timeout;
        let cancel = self.cancel.child_token();

        tracing::info!(
            wave = wave.number(),
            segments = ?wave.segments,
            target = wave.target,
            "Dispatching wave",
        );

        let (jobs, dispatch_timed_out) = self.dispatch(wave, &cancel, deadline).await;

        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled {
                wave: wave.number(),
            });
        }

        let observed = if dispatch_timed_out {
            // Jobs that hung after writing their clip still count.
            let count = self.artifacts.count().await?;
            (count >= wave.target).then_some(count)
        } else {
            self.await_artifacts(wave, deadline).await?
        };

        let mut report = WaveReport {
            wave: wave.number(),
            segments: wave.segments.clone(),
            target: wave.target,
            observed: 0,
            jobs,
            started_at,
            finished_at: Utc::now(),
        };

        match observed {
            Some(observed) => {
                report.observed = observed;
                tracing::info!(
                    wave = report.wave,
                    observed,
                    target = report.target,
                    failed = ?report.failed_segments(),
                    "Wave confirmed",
                );
                Ok(report)
            }
            None => {
                let observed = self.artifacts.count().await?;
                tracing::error!(
                    wave = report.wave,
                    observed,
                    expected = report.target,
                    "Wave timed out",
                );
                Err(SchedulerError::Timeout {
                    wave: report.wave,
                    expected: report.target,
                    observed,
                    timeout: self.config.wave_timeout,
                    failed: report.failed_segments(),
                })
            }
        }
    }

    /// Run every job of `wave` concurrently and collect their results.
    ///
    /// Returns `true` alongside the reports when the deadline passed while
    /// jobs were still running; those jobs are cancelled, then aborted.
    async fn dispatch(
        &self,
        wave: &Wave,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> (Vec<JobReport>, bool) {
        let mut set = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, SegmentId> = HashMap::new();

        for &segment in &wave.segments {
            let renderer = Arc::clone(&self.renderer);
            let token = cancel.clone();
            let handle = set.spawn(async move { (segment, renderer.render(segment, token).await) });
            running.insert(handle.id(), segment);
        }

        let mut jobs = Vec::with_capacity(wave.len());
        let mut timed_out = false;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled(), if !cancel.is_cancelled() => {
                    cancel.cancel();
                    continue;
                }
                next = tokio::time::timeout_at(deadline, set.join_next_with_id()) => next,
            };

            match next {
                Ok(Some(joined)) => {
                    jobs.push(job_report(wave.number(), joined, &mut running));
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tracing::warn!(
                        wave = wave.number(),
                        outstanding = running.len(),
                        "Wave deadline passed with jobs still running; cancelling",
                    );
                    cancel.cancel();
                    let grace = Instant::now() + CANCEL_GRACE;
                    while let Ok(Some(joined)) =
                        tokio::time::timeout_at(grace, set.join_next_with_id()).await
                    {
                        jobs.push(job_report(wave.number(), joined, &mut running));
                    }
                    set.abort_all();
                    while let Some(joined) = set.join_next_with_id().await {
                        jobs.push(job_report(wave.number(), joined, &mut running));
                    }
                    break;
                }
            }
        }

        (jobs, timed_out)
    }

    /// Poll the artifact count until it reaches the wave's target.
    ///
    /// Returns `None` if the deadline passes first.
    async fn await_artifacts(
        &self,
        wave: &Wave,
        deadline: Instant,
    ) -> Result<Option<usize>, SchedulerError> {
        loop {
            let count = self.artifacts.count().await?;
            if count >= wave.target {
                return Ok(Some(count));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tracing::debug!(
                wave = wave.number(),
                count,
                target = wave.target,
                "Waiting for artifacts",
            );
            let wake = (now + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SchedulerError::Cancelled { wave: wave.number() });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}

type Joined = Result<
    (tokio::task::Id, (SegmentId, Result<RenderOutput, RenderError>)),
    tokio::task::JoinError,
>;

fn job_report(
    wave: usize,
    joined: Joined,
    running: &mut HashMap<tokio::task::Id, SegmentId>,
) -> JobReport {
    let (segment, outcome) = match joined {
        Ok((id, (segment, result))) => {
            running.remove(&id);
            let outcome = match result {
                Ok(output) => {
                    tracing::info!(
                        wave,
                        segment,
                        prompt_id = %output.prompt_id,
                        files = output.local_paths.len(),
                        "Render job succeeded",
                    );
                    JobOutcome::Succeeded {
                        prompt_id: output.prompt_id,
                        files: output.local_paths.len(),
                    }
                }
                Err(e) if e.is_cancelled() => {
                    tracing::warn!(wave, segment, error = %e, "Render job cancelled");
                    JobOutcome::Cancelled
                }
                Err(e) => {
                    tracing::error!(wave, segment, error = %e, "Render job failed");
                    JobOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            (segment, outcome)
        }
        Err(e) => {
            let segment = running.remove(&e.id()).unwrap_or_default();
            if e.is_panic() {
                tracing::error!(wave, segment, "Render job panicked");
            } else {
                tracing::warn!(wave, segment, "Render job aborted");
            }
            (segment, JobOutcome::Aborted)
        }
    };

    JobReport {
        segment,
        outcome,
        finished_at: Utc::now(),
    }
}
