//! Metrics abstraction for the subscription watcher.
//!
//! Every stage worker reports through the [`Metrics`] trait rather than a
//! global registry directly, so the pipeline core can be exercised in tests
//! against [`NoopMetrics`] without standing up a real `prometheus` registry.

use std::time::{
    Duration,
    Instant,
};

mod prod;

pub use prod::PrometheusMetrics;

/// The four stage workers that make up the pipeline, used as a label on
/// every metric so a single dashboard panel can break down by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DataFetcher,
    MediaDownloader,
    MediaUploader,
    Sender,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DataFetcher => "data_fetcher",
            Stage::MediaDownloader => "media_downloader",
            Stage::MediaUploader => "media_uploader",
            Stage::Sender => "sender",
        }
    }
}

/// Outcome of one unit of work processed by a stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retry,
    Dropped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Retry => "retry",
            Outcome::Dropped => "dropped",
        }
    }
}

/// Snapshot of the wait pool's queue depths, sampled periodically and fed to
/// the gauges. Mirrors the `qsize_*`/`size`/`size_active` accessors on the
/// wait pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSizes {
    pub total: usize,
    pub active: usize,
    pub fetch_new: usize,
    pub fetch_refresh: usize,
    pub download: usize,
    pub upload: usize,
    pub send: usize,
}

/// Abstraction over metrics reporting so the pipeline core never talks to a
/// concrete registry. Implement [`PrometheusMetrics`] in production and
/// [`NoopMetrics`] (or any test double) everywhere else.
pub trait Metrics: Send + Sync + 'static {
    /// Record how long one unit of work spent actively processing in a
    /// stage, along with its outcome.
    fn record_stage_duration(&self, stage: Stage, outcome: Outcome, duration: Duration);

    /// Record how long a stage worker sat idle waiting for work to become
    /// ready, as opposed to time spent actively processing it.
    fn record_wait_duration(&self, stage: Stage, duration: Duration);

    /// Record the delay a stage worker backed off for after a failure.
    fn record_backoff(&self, stage: Stage, duration: Duration);

    /// Update the wait pool queue-depth gauges.
    fn record_queue_sizes(&self, sizes: QueueSizes);
}

/// RAII helper that records a stage's active-processing duration on drop,
/// tagged with whatever [`Outcome`] is set before the timer is dropped.
/// Defaults to [`Outcome::Dropped`] so a timer abandoned by an early return
/// (e.g. a `?` inside the timed block) still reports something rather than
/// silently vanishing.
pub struct StageTimer<'a> {
    metrics: &'a dyn Metrics,
    stage: Stage,
    outcome: Outcome,
    start: Instant,
}

impl<'a> StageTimer<'a> {
    pub fn start(metrics: &'a dyn Metrics, stage: Stage) -> Self {
        Self {
            metrics,
            stage,
            outcome: Outcome::Dropped,
            start: Instant::now(),
        }
    }

    pub fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_stage_duration(self.stage, self.outcome, self.start.elapsed());
    }
}

/// A [`Metrics`] implementation that does nothing, used as the default in
/// every unit test so pipeline logic can be exercised without a live
/// registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record_stage_duration(&self, _stage: Stage, _outcome: Outcome, _duration: Duration) {}

    fn record_wait_duration(&self, _stage: Stage, _duration: Duration) {}

    fn record_backoff(&self, _stage: Stage, _duration: Duration) {}

    fn record_queue_sizes(&self, _sizes: QueueSizes) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_reports_on_drop() {
        struct Recording {
            calls: parking_lot::Mutex<Vec<(Stage, Outcome)>>,
        }
        impl Metrics for Recording {
            fn record_stage_duration(&self, stage: Stage, outcome: Outcome, _duration: Duration) {
                self.calls.lock().push((stage, outcome));
            }
            fn record_wait_duration(&self, _stage: Stage, _duration: Duration) {}
            fn record_backoff(&self, _stage: Stage, _duration: Duration) {}
            fn record_queue_sizes(&self, _sizes: QueueSizes) {}
        }
        let recording = Recording {
            calls: parking_lot::Mutex::new(Vec::new()),
        };
        {
            let mut timer = StageTimer::start(&recording, Stage::Sender);
            timer.set_outcome(Outcome::Success);
        }
        assert_eq!(
            *recording.calls.lock(),
            vec![(Stage::Sender, Outcome::Success)]
        );
    }

    #[test]
    fn noop_metrics_accepts_everything() {
        let metrics = NoopMetrics;
        metrics.record_stage_duration(Stage::Sender, Outcome::Success, Duration::ZERO);
        metrics.record_wait_duration(Stage::Sender, Duration::ZERO);
        metrics.record_backoff(Stage::Sender, Duration::ZERO);
        metrics.record_queue_sizes(QueueSizes::default());
    }
}
