//! Threshold parsing and evaluation.
//!
//! Expressions take the form `<statistic><comparator><limit>`, for example
//! `p(95)<500`, `rate<=0.1`, `avg<200` or `count>=1`. Statistics available per
//! metric kind:
//!
//! | kind    | statistics                                   |
//! |---------|----------------------------------------------|
//! | trend   | `p(N)`, `avg`, `min`, `max`, `med`, `count`  |
//! | rate    | `rate`                                       |
//! | counter | `count`, `value`, `rate` (per second)        |
//! | gauge   | `value`, `min`, `max`                        |
//!
//! Thresholds are compiled against the set of metrics a plan records before
//! any traffic is generated; a malformed expression, an unknown metric or a
//! statistic that does not fit the metric's kind is a configuration error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surge_core::{CoreError, CoreResult, MetricKind, ThresholdSpec};

use crate::collector::MetricsCollector;
use crate::summary::{MetricSummary, MetricsSnapshot};

/// Which number a threshold inspects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
}

impl Statistic {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            "count" => Some(Self::Count),
            "rate" => Some(Self::Rate),
            "value" => Some(Self::Value),
            _ => {
                let inner = raw.strip_prefix("p(")?.strip_suffix(')')?;
                let p: f64 = inner.trim().parse().ok()?;
                (0.0..=100.0).contains(&p).then_some(Self::Percentile(p))
            }
        }
    }

    fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => matches!(
                self,
                Self::Percentile(_) | Self::Avg | Self::Min | Self::Max | Self::Med | Self::Count
            ),
            MetricKind::Rate => matches!(self, Self::Rate),
            MetricKind::Counter => matches!(self, Self::Count | Self::Value | Self::Rate),
            MetricKind::Gauge => matches!(self, Self::Value | Self::Min | Self::Max),
        }
    }

    /// Extract the statistic from a summary; `None` when there is no data.
    pub fn extract(self, summary: &MetricSummary) -> Option<f64> {
        if !summary.has_data() {
            return None;
        }
        match (self, summary) {
            (Self::Percentile(p), MetricSummary::Trend(t)) => t.percentile(p),
            (Self::Avg, MetricSummary::Trend(t)) => Some(t.avg),
            (Self::Min, MetricSummary::Trend(t)) => Some(t.min),
            (Self::Max, MetricSummary::Trend(t)) => Some(t.max),
            (Self::Med, MetricSummary::Trend(t)) => Some(t.med),
            (Self::Count, MetricSummary::Trend(t)) => Some(t.count as f64),
            (Self::Rate, MetricSummary::Rate { rate, .. }) => Some(*rate),
            (Self::Count | Self::Value, MetricSummary::Counter { count, .. }) => Some(*count),
            (Self::Rate, MetricSummary::Counter { rate, .. }) => Some(*rate),
            (Self::Value, MetricSummary::Gauge { value, .. }) => Some(*value),
            (Self::Min, MetricSummary::Gauge { min, .. }) => Some(*min),
            (Self::Max, MetricSummary::Gauge { max, .. }) => Some(*max),
            _ => None,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentile(p) => write!(f, "p({})", p),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    /// Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparator); 7] = [
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
        ("=", Comparator::Eq),
    ];

    pub fn apply(self, actual: f64, limit: f64) -> bool {
        match self {
            Self::Lt => actual < limit,
            Self::Le => actual <= limit,
            Self::Gt => actual > limit,
            Self::Ge => actual >= limit,
            Self::Eq => actual == limit,
            Self::Ne => actual != limit,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// A parsed threshold expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub limit: f64,
}

impl ThresholdExpr {
    /// Parse an expression attached to `metric`.
    pub fn parse(metric: &str, expression: &str) -> CoreResult<Self> {
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let invalid = |reason: &str| CoreError::invalid_threshold(metric, expression, reason);

        let (position, token, comparator) = compact
            .char_indices()
            .find_map(|(i, _)| {
                Comparator::TOKENS
                    .iter()
                    .find(|(token, _)| compact[i..].starts_with(token))
                    .map(|(token, cmp)| (i, *token, *cmp))
            })
            .ok_or_else(|| invalid("missing comparator"))?;

        let lhs = &compact[..position];
        let rhs = &compact[position + token.len()..];

        let statistic = Statistic::parse(lhs)
            .ok_or_else(|| invalid(&format!("unknown statistic `{}`", lhs)))?;
        let limit: f64 = rhs
            .parse()
            .map_err(|_| invalid(&format!("limit `{}` is not a number", rhs)))?;
        if !limit.is_finite() {
            return Err(invalid("limit must be finite"));
        }

        Ok(Self {
            statistic,
            comparator,
            limit,
        })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.statistic, self.comparator.symbol(), self.limit)
    }
}

/// Where thresholds read metric state from.
pub trait MetricSource {
    fn kind_of(&self, name: &str) -> Option<MetricKind>;

    /// Cumulative summary, or the trailing `window` when given.
    fn summary(&self, name: &str, window: Option<Duration>) -> Option<MetricSummary>;
}

impl MetricSource for MetricsCollector {
    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        MetricsCollector::kind_of(self, name)
    }

    fn summary(&self, name: &str, window: Option<Duration>) -> Option<MetricSummary> {
        match window {
            Some(window) => self.window_summary(name, window),
            None => MetricsCollector::summary(self, name),
        }
    }
}

/// Snapshots only answer cumulative queries.
impl MetricSource for MetricsSnapshot {
    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.get(name).map(MetricSummary::kind)
    }

    fn summary(&self, name: &str, window: Option<Duration>) -> Option<MetricSummary> {
        match window {
            Some(_) => None,
            None => self.get(name).cloned(),
        }
    }
}

/// A threshold ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledThreshold {
    pub spec: ThresholdSpec,
    pub expr: ThresholdExpr,
}

/// Outcome of one threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<f64>,
    /// `None` when the metric had no observations.
    pub actual: Option<f64>,
    pub passed: bool,
}

/// Verdict over every threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub pass: bool,
    pub results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// All thresholds of a plan, validated against the metrics it declares.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSet {
    thresholds: Vec<CompiledThreshold>,
}

impl ThresholdSet {
    /// Parse and validate every threshold against the kinds `source` knows about.
    pub fn compile(specs: &[ThresholdSpec], source: &impl MetricSource) -> CoreResult<Self> {
        let mut thresholds = Vec::with_capacity(specs.len());
        for spec in specs {
            let expr = ThresholdExpr::parse(&spec.metric, &spec.expression)?;
            let kind = source
                .kind_of(&spec.metric)
                .ok_or_else(|| CoreError::unknown_metric(&spec.metric))?;

            if !expr.statistic.applies_to(kind) {
                return Err(CoreError::invalid_threshold(
                    &spec.metric,
                    &spec.expression,
                    format!("statistic `{}` does not apply to a {}", expr.statistic, kind),
                ));
            }
            if spec.window.is_some() && !matches!(kind, MetricKind::Rate | MetricKind::Trend) {
                return Err(CoreError::invalid_threshold(
                    &spec.metric,
                    &spec.expression,
                    format!("windowed thresholds need a rate or trend, not a {}", kind),
                ));
            }

            thresholds.push(CompiledThreshold {
                spec: spec.clone(),
                expr,
            });
        }
        Ok(Self { thresholds })
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledThreshold> {
        self.thresholds.iter()
    }

    /// Evaluate every threshold; the run passes only if all of them do.
    pub fn evaluate(&self, source: &impl MetricSource) -> ThresholdReport {
        let results: Vec<ThresholdResult> = self
            .thresholds
            .iter()
            .map(|threshold| {
                let actual = source
                    .summary(&threshold.spec.metric, threshold.spec.window)
                    .and_then(|summary| threshold.expr.statistic.extract(&summary));
                let passed = actual
                    .map(|value| threshold.expr.comparator.apply(value, threshold.expr.limit))
                    .unwrap_or(false);

                if !passed {
                    tracing::debug!(
                        metric = %threshold.spec.metric,
                        expression = %threshold.spec.expression,
                        actual = ?actual,
                        "threshold failed"
                    );
                }

                ThresholdResult {
                    metric: threshold.spec.metric.clone(),
                    expression: threshold.spec.expression.clone(),
                    window_secs: threshold.spec.window.map(|w| w.as_secs_f64()),
                    actual,
                    passed,
                }
            })
            .collect();

        ThresholdReport {
            pass: results.iter().all(|r| r.passed),
            results,
        }
    }
}

/// Compile and evaluate in one step.
pub fn evaluate(specs: &[ThresholdSpec], source: &impl MetricSource) -> CoreResult<ThresholdReport> {
    Ok(ThresholdSet::compile(specs, source)?.evaluate(source))
}
