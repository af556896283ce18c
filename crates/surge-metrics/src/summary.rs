//! Point-in-time summaries of metrics.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surge_core::MetricKind;

/// Nearest-rank percentile over an ascending sample.
///
/// For `n` samples, `p` selects the value at 1-indexed rank `ceil(p/100 * n)`,
/// clamped to `[1, n]`. Returns `None` for an empty sample.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    // Multiply before dividing so integral percentiles of integral counts stay exact.
    let rank = ((p * n as f64) / 100.0).ceil() as usize;
    let rank = rank.clamp(1, n);
    Some(sorted[rank - 1])
}

/// Distribution summary of a trend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,

    #[serde(skip)]
    sorted: Arc<Vec<f64>>,
}

impl TrendSummary {
    /// Build from an ascending sample.
    pub fn from_sorted(sorted: Vec<f64>) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        let count = sorted.len() as u64;
        let sum: f64 = sorted.iter().sum();
        let at = |p: f64| nearest_rank(&sorted, p).unwrap_or(0.0);
        Self {
            count,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sum / count as f64,
            med: at(50.0),
            p90: at(90.0),
            p95: at(95.0),
            p99: at(99.0),
            sorted: Arc::new(sorted),
        }
    }

    /// Build from an unordered sample.
    pub fn from_unsorted(mut values: Vec<f64>) -> Self {
        values.sort_unstable_by(f64::total_cmp);
        Self::from_sorted(values)
    }

    /// Any percentile in `[0, 100]`; `None` without observations.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.sorted, p)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Summary of one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSummary {
    Counter {
        count: f64,
        /// Per second over the elapsed run time.
        rate: f64,
    },
    Gauge {
        value: f64,
        min: f64,
        max: f64,
        writes: u64,
    },
    Rate {
        passes: u64,
        fails: u64,
        rate: f64,
    },
    Trend(TrendSummary),
}

impl MetricSummary {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Whether the summary carries at least one observation.
    pub fn has_data(&self) -> bool {
        match self {
            Self::Counter { .. } => true,
            Self::Gauge { writes, .. } => *writes > 0,
            Self::Rate { passes, fails, .. } => passes + fails > 0,
            Self::Trend(trend) => !trend.is_empty(),
        }
    }

    pub(crate) fn rate(passes: u64, total: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            passes as f64 / total as f64
        };
        Self::Rate {
            passes,
            fails: total - passes,
            rate,
        }
    }
}

/// Every metric of a run at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the collector was created.
    pub elapsed_secs: f64,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Trend(trend)) => Some(trend),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricSummary::Rate { rate, .. }) => Some(*rate),
            _ => None,
        }
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricSummary::Counter { count, .. }) => Some(*count),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricSummary::Gauge { value, .. }) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p95_of_one_to_hundred_is_95() {
        let sample: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank(&sample, 95.0), Some(95.0));
        assert_eq!(nearest_rank(&sample, 50.0), Some(50.0));
        assert_eq!(nearest_rank(&sample, 99.0), Some(99.0));
        assert_eq!(nearest_rank(&sample, 100.0), Some(100.0));
        assert_eq!(nearest_rank(&sample, 0.0), Some(1.0));
    }

    #[test]
    fn test_rank_clamps_for_small_samples() {
        assert_eq!(nearest_rank(&[7.0], 99.0), Some(7.0));
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0], 95.0), Some(3.0));
        assert_eq!(nearest_rank(&[], 95.0), None);
    }

    #[test]
    fn test_trend_summary() {
        let summary = TrendSummary::from_unsorted(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.avg, 2.5);
        assert_eq!(summary.med, 2.0);
        assert_eq!(summary.percentile(75.0), Some(3.0));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "http_reqs".to_string(),
            MetricSummary::Counter {
                count: 12.0,
                rate: 1.2,
            },
        );
        metrics.insert("errors".to_string(), MetricSummary::rate(1, 4));
        metrics.insert(
            "http_req_duration".to_string(),
            MetricSummary::Trend(TrendSummary::from_unsorted(vec![30.0, 10.0, 20.0])),
        );
        let snapshot = MetricsSnapshot {
            elapsed_secs: 10.0,
            metrics,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["metrics"]["http_reqs"]["type"], "counter");
        assert_eq!(value["metrics"]["errors"]["type"], "rate");
        assert_eq!(value["metrics"]["errors"]["rate"], 0.25);
        assert_eq!(value["metrics"]["http_req_duration"]["type"], "trend");
        assert_eq!(value["metrics"]["http_req_duration"]["med"], 20.0);

        let back: MetricsSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.counter("http_reqs"), Some(12.0));
        assert_eq!(back.rate("errors"), Some(0.25));
        assert_eq!(back.trend("http_req_duration").map(|t| t.max), Some(30.0));
    }

    #[test]
    fn test_rate_summary_is_exact() {
        match MetricSummary::rate(7, 10) {
            MetricSummary::Rate { passes, fails, rate } => {
                assert_eq!(passes, 7);
                assert_eq!(fails, 3);
                assert_eq!(rate, 0.7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
