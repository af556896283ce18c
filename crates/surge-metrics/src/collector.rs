//! Run-scoped metrics registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use surge_core::{CoreError, CoreResult, MetricDescriptor, MetricKind};
use tokio::time::Instant;

use crate::series::MetricCell;
use crate::summary::{MetricSummary, MetricsSnapshot};

/// Named counters, gauges, rates and trends for one test run.
///
/// Each run owns its own collector; nothing is process-global. Metrics are
/// created lazily on first write, or eagerly through [`declare`](Self::declare)
/// so thresholds can be validated before traffic starts. The registry map is
/// only write-locked to insert a new name; recording into an existing metric
/// takes the read lock plus that metric's own cell synchronization.
///
/// Time is measured with `tokio::time::Instant`, so a paused tokio clock
/// drives windowed queries in tests.
#[derive(Debug)]
pub struct MetricsCollector {
    epoch: Instant,
    retention: Option<Duration>,
    metrics: RwLock<HashMap<String, Arc<MetricCell>>>,
}

impl MetricsCollector {
    /// Collector without windowed history.
    pub fn new() -> Self {
        Self::with_retention(None)
    }

    /// Collector that keeps `retention` worth of timestamped rate/trend history.
    pub fn with_retention(retention: Option<Duration>) -> Self {
        Self {
            epoch: Instant::now(),
            retention,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Time since the collector was created.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Register metrics up front. Re-declaring with the same kind is a no-op.
    pub fn declare(&self, descriptors: &[MetricDescriptor]) -> CoreResult<()> {
        for descriptor in descriptors {
            self.cell(&descriptor.name, descriptor.kind)?;
        }
        Ok(())
    }

    fn cell(&self, name: &str, kind: MetricKind) -> CoreResult<Arc<MetricCell>> {
        if let Some(cell) = self.metrics.read().get(name) {
            return Self::check_kind(name, cell, kind);
        }

        let mut metrics = self.metrics.write();
        let cell = metrics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MetricCell::new(kind, self.retention)));
        Self::check_kind(name, cell, kind)
    }

    fn check_kind(name: &str, cell: &Arc<MetricCell>, kind: MetricKind) -> CoreResult<Arc<MetricCell>> {
        if cell.kind() != kind {
            return Err(CoreError::internal(format!(
                "metric `{}` is a {}, not a {}",
                name,
                cell.kind(),
                kind
            )));
        }
        Ok(Arc::clone(cell))
    }

    /// Record one observation.
    ///
    /// Counter adds `value`, gauge stores it, rate counts it as true when
    /// non-zero, trend inserts it into the distribution.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64) -> CoreResult<()> {
        self.record_at(name, kind, value, self.elapsed())
    }

    /// Record with an explicit collector-relative timestamp.
    pub fn record_at(&self, name: &str, kind: MetricKind, value: f64, at: Duration) -> CoreResult<()> {
        let cell = self.cell(name, kind)?;
        if !cell.record(value, at) {
            tracing::debug!(metric = name, value, "rejected metric value");
        }
        Ok(())
    }

    pub fn add(&self, name: &str, delta: f64) -> CoreResult<()> {
        self.record(name, MetricKind::Counter, delta)
    }

    pub fn set(&self, name: &str, value: f64) -> CoreResult<()> {
        self.record(name, MetricKind::Gauge, value)
    }

    pub fn observe(&self, name: &str, value: bool) -> CoreResult<()> {
        self.record(name, MetricKind::Rate, if value { 1.0 } else { 0.0 })
    }

    pub fn time(&self, name: &str, value: f64) -> CoreResult<()> {
        self.record(name, MetricKind::Trend, value)
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.read().get(name).map(|cell| cell.kind())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cumulative summary of one metric.
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        let cell = self.metrics.read().get(name).cloned()?;
        Some(cell.summary(self.elapsed()))
    }

    /// Summary over the trailing `window` ending now.
    ///
    /// `None` when the metric is unknown, keeps no history (counter, gauge),
    /// or the window is longer than the configured retention.
    pub fn window_summary(&self, name: &str, window: Duration) -> Option<MetricSummary> {
        if self.retention.map_or(true, |retention| window > retention) {
            return None;
        }
        let cell = self.metrics.read().get(name).cloned()?;
        cell.window_summary(self.elapsed(), window)
    }

    /// Summaries of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.elapsed();
        let cells: Vec<(String, Arc<MetricCell>)> = self
            .metrics
            .read()
            .iter()
            .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
            .collect();

        let metrics: BTreeMap<String, MetricSummary> = cells
            .into_iter()
            .map(|(name, cell)| (name, cell.summary(elapsed)))
            .collect();

        MetricsSnapshot {
            elapsed_secs: elapsed.as_secs_f64(),
            metrics,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
