use std::time::Duration;

use prometheus::{
    Gauge,
    GaugeVec,
    Histogram,
    HistogramVec,
    Opts,
    Registry,
};

use crate::{
    Metrics,
    Outcome,
    QueueSizes,
    Stage,
};

/// Production [`Metrics`] implementation, backed by the stock `prometheus`
/// crate against a dedicated [`Registry`] the caller exposes on its own
/// `/metrics` endpoint (or scrapes directly in a one-shot CLI run).
pub struct PrometheusMetrics {
    stage_duration: HistogramVec,
    wait_duration: HistogramVec,
    backoff_duration: HistogramVec,
    queue_size: GaugeVec,
    active_size: Gauge,
    total_size: Gauge,
}

impl PrometheusMetrics {
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let stage_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "watcher_stage_duration_seconds",
                "Time a stage worker spent actively processing one item",
            ),
            &["stage", "outcome"],
        )?;
        let wait_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "watcher_stage_wait_seconds",
                "Time a stage worker spent idle waiting for ready work",
            ),
            &["stage"],
        )?;
        let backoff_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "watcher_stage_backoff_seconds",
                "Backoff delay applied after a stage worker failure",
            ),
            &["stage"],
        )?;
        let queue_size = GaugeVec::new(
            Opts::new(
                "watcher_queue_size",
                "Number of submissions waiting at each pipeline queue",
            ),
            &["queue"],
        )?;
        let active_size = Gauge::with_opts(Opts::new(
            "watcher_active_size",
            "Number of submissions currently held by the wait pool, in any stage",
        ))?;
        let total_size = Gauge::with_opts(Opts::new(
            "watcher_total_size",
            "Total number of submissions tracked by the wait pool",
        ))?;

        registry.register(Box::new(stage_duration.clone()))?;
        registry.register(Box::new(wait_duration.clone()))?;
        registry.register(Box::new(backoff_duration.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(active_size.clone()))?;
        registry.register(Box::new(total_size.clone()))?;

        Ok(Self {
            stage_duration,
            wait_duration,
            backoff_duration,
            queue_size,
            active_size,
            total_size,
        })
    }

    fn histogram(vec: &HistogramVec, labels: &[&str]) -> Histogram {
        vec.with_label_values(labels)
    }
}

impl Metrics for PrometheusMetrics {
    fn record_stage_duration(&self, stage: Stage, outcome: Outcome, duration: Duration) {
        Self::histogram(&self.stage_duration, &[stage.as_str(), outcome.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_wait_duration(&self, stage: Stage, duration: Duration) {
        Self::histogram(&self.wait_duration, &[stage.as_str()]).observe(duration.as_secs_f64());
    }

    fn record_backoff(&self, stage: Stage, duration: Duration) {
        Self::histogram(&self.backoff_duration, &[stage.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_queue_sizes(&self, sizes: QueueSizes) {
        self.total_size.set(sizes.total as f64);
        self.active_size.set(sizes.active as f64);
        self.queue_size
            .with_label_values(&["fetch_new"])
            .set(sizes.fetch_new as f64);
        self.queue_size
            .with_label_values(&["fetch_refresh"])
            .set(sizes.fetch_refresh as f64);
        self.queue_size
            .with_label_values(&["download"])
            .set(sizes.download as f64);
        self.queue_size
            .with_label_values(&["upload"])
            .set(sizes.upload as f64);
        self.queue_size
            .with_label_values(&["send"])
            .set(sizes.send as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_error() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        metrics.record_stage_duration(Stage::Sender, Outcome::Success, Duration::from_millis(5));
        metrics.record_queue_sizes(QueueSizes {
            total: 3,
            active: 2,
            fetch_new: 1,
            ..Default::default()
        });
        assert!(!registry.gather().is_empty());
    }
}
