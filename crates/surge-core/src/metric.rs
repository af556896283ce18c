//! Metric kinds and the names of metrics every run records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a named metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonically increasing sum.
    Counter,
    /// Last-written value.
    Gauge,
    /// Fraction of true observations.
    Rate,
    /// Distribution of numeric observations.
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Rate => "rate",
            Self::Trend => "trend",
        };
        f.write_str(name)
    }
}

/// Name and kind of a metric a plan will record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Request round-trip time in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Requests that failed at transport level or returned an unexpected status.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// One observation per evaluated check.
pub const CHECKS: &str = "checks";
/// One observation per action; true when any of its checks failed, or when an
/// action without checks got a transport error or an unexpected status.
pub const ERRORS: &str = "errors";
/// Completed workload iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall time of a full workload iteration in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Live virtual users.
pub const VUS: &str = "vus";
/// Configured virtual user cap.
pub const VUS_MAX: &str = "vus_max";

/// Metrics recorded by every run regardless of workload.
pub fn builtin_metrics() -> Vec<MetricDescriptor> {
    vec![
        MetricDescriptor::new(HTTP_REQS, MetricKind::Counter),
        MetricDescriptor::new(HTTP_REQ_DURATION, MetricKind::Trend),
        MetricDescriptor::new(HTTP_REQ_FAILED, MetricKind::Rate),
        MetricDescriptor::new(CHECKS, MetricKind::Rate),
        MetricDescriptor::new(ERRORS, MetricKind::Rate),
        MetricDescriptor::new(ITERATIONS, MetricKind::Counter),
        MetricDescriptor::new(ITERATION_DURATION, MetricKind::Trend),
        MetricDescriptor::new(VUS, MetricKind::Gauge),
        MetricDescriptor::new(VUS_MAX, MetricKind::Gauge),
    ]
}
