//! Metrics collection and threshold evaluation for surge runs.
//!
//! - [`MetricsCollector`]: concurrent counters, gauges, rates and trends
//! - [`ThresholdSet`]: pass/fail expressions compiled against declared metrics

pub mod collector;
mod series;
pub mod summary;
pub mod threshold;

pub use collector::MetricsCollector;
pub use summary::{nearest_rank, MetricSummary, MetricsSnapshot, TrendSummary};
pub use threshold::{
    evaluate, Comparator, MetricSource, Statistic, ThresholdExpr, ThresholdReport,
    ThresholdResult, ThresholdSet,
};
