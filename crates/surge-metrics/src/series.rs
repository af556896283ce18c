//! Per-metric storage cells.
//!
//! Counters and gauges accumulate lock-free in `AtomicU64` bit patterns.
//! Rates and trends keep a timestamped history for windowed queries, so they
//! sit behind a per-metric `parking_lot::Mutex`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::MetricKind;

use crate::summary::{MetricSummary, TrendSummary};

/// f64 stored as raw bits for atomic updates.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(f(f64::from_bits(bits)).to_bits())
            });
    }
}

#[derive(Debug)]
pub(crate) struct CounterCell {
    sum: AtomicF64,
}

impl CounterCell {
    fn new() -> Self {
        Self {
            sum: AtomicF64::new(0.0),
        }
    }

    /// Negative deltas are ignored; a counter never decreases.
    fn add(&self, delta: f64) -> bool {
        if !(delta >= 0.0) || !delta.is_finite() {
            return false;
        }
        self.sum.update(|current| current + delta);
        true
    }

    fn summary(&self, elapsed: Duration) -> MetricSummary {
        let count = self.sum.load();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { count / secs } else { 0.0 };
        MetricSummary::Counter { count, rate }
    }
}

#[derive(Debug)]
pub(crate) struct GaugeCell {
    value: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    writes: AtomicU64,
}

impl GaugeCell {
    fn new() -> Self {
        Self {
            value: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            writes: AtomicU64::new(0),
        }
    }

    fn set(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.value.store(value);
        self.min.update(|current| current.min(value));
        self.max.update(|current| current.max(value));
        self.writes.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn summary(&self) -> MetricSummary {
        let writes = self.writes.load(Ordering::Acquire);
        if writes == 0 {
            return MetricSummary::Gauge {
                value: 0.0,
                min: 0.0,
                max: 0.0,
                writes,
            };
        }
        MetricSummary::Gauge {
            value: self.value.load(),
            min: self.min.load(),
            max: self.max.load(),
            writes,
        }
    }
}

/// Drop history older than `retention` relative to `now`.
fn prune<T>(history: &mut VecDeque<(Duration, T)>, now: Duration, retention: Duration) {
    let cutoff = now.saturating_sub(retention);
    while history.front().is_some_and(|(at, _)| *at < cutoff) {
        history.pop_front();
    }
}

#[derive(Debug, Default)]
struct RateState {
    passes: u64,
    total: u64,
    history: VecDeque<(Duration, bool)>,
}

#[derive(Debug)]
pub(crate) struct RateCell {
    state: Mutex<RateState>,
    retention: Option<Duration>,
}

impl RateCell {
    fn new(retention: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(RateState::default()),
            retention,
        }
    }

    fn record(&self, value: bool, at: Duration) {
        let mut state = self.state.lock();
        state.total += 1;
        if value {
            state.passes += 1;
        }
        if let Some(retention) = self.retention {
            state.history.push_back((at, value));
            prune(&mut state.history, at, retention);
        }
    }

    fn summary(&self) -> MetricSummary {
        let state = self.state.lock();
        MetricSummary::rate(state.passes, state.total)
    }

    fn window_summary(&self, now: Duration, window: Duration) -> MetricSummary {
        let state = self.state.lock();
        let cutoff = now.saturating_sub(window);
        let (passes, total) = state
            .history
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .fold((0u64, 0u64), |(p, t), (_, v)| (p + u64::from(*v), t + 1));
        MetricSummary::rate(passes, total)
    }
}

#[derive(Debug, Default)]
struct TrendState {
    values: Vec<f64>,
    sorted: bool,
    history: VecDeque<(Duration, f64)>,
}

#[derive(Debug)]
pub(crate) struct TrendCell {
    state: Mutex<TrendState>,
    retention: Option<Duration>,
}

impl TrendCell {
    fn new(retention: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(TrendState {
                sorted: true,
                ..Default::default()
            }),
            retention,
        }
    }

    fn record(&self, value: f64, at: Duration) -> bool {
        if !value.is_finite() {
            return false;
        }
        let mut state = self.state.lock();
        if state.sorted && state.values.last().is_some_and(|last| *last > value) {
            state.sorted = false;
        }
        state.values.push(value);
        if let Some(retention) = self.retention {
            state.history.push_back((at, value));
            prune(&mut state.history, at, retention);
        }
        true
    }

    fn summary(&self) -> MetricSummary {
        let mut state = self.state.lock();
        if !state.sorted {
            state.values.sort_unstable_by(f64::total_cmp);
            state.sorted = true;
        }
        MetricSummary::Trend(TrendSummary::from_sorted(state.values.clone()))
    }

    fn window_summary(&self, now: Duration, window: Duration) -> MetricSummary {
        let values: Vec<f64> = {
            let state = self.state.lock();
            let cutoff = now.saturating_sub(window);
            state
                .history
                .iter()
                .filter(|(at, _)| *at >= cutoff)
                .map(|(_, v)| *v)
                .collect()
        };
        MetricSummary::Trend(TrendSummary::from_unsorted(values))
    }
}

/// Storage for one named metric.
#[derive(Debug)]
pub(crate) enum MetricCell {
    Counter(CounterCell),
    Gauge(GaugeCell),
    Rate(RateCell),
    Trend(TrendCell),
}

impl MetricCell {
    pub(crate) fn new(kind: MetricKind, retention: Option<Duration>) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(CounterCell::new()),
            MetricKind::Gauge => Self::Gauge(GaugeCell::new()),
            MetricKind::Rate => Self::Rate(RateCell::new(retention)),
            MetricKind::Trend => Self::Trend(TrendCell::new(retention)),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Apply one observation. Rates treat any non-zero value as true.
    /// Returns false when the value is rejected (negative counter delta, non-finite).
    pub(crate) fn record(&self, value: f64, at: Duration) -> bool {
        match self {
            Self::Counter(c) => c.add(value),
            Self::Gauge(g) => g.set(value),
            Self::Rate(r) => {
                r.record(value != 0.0, at);
                true
            }
            Self::Trend(t) => t.record(value, at),
        }
    }

    pub(crate) fn summary(&self, elapsed: Duration) -> MetricSummary {
        match self {
            Self::Counter(c) => c.summary(elapsed),
            Self::Gauge(g) => g.summary(),
            Self::Rate(r) => r.summary(),
            Self::Trend(t) => t.summary(),
        }
    }

    /// Trailing-window summary; only rates and trends keep history.
    pub(crate) fn window_summary(&self, now: Duration, window: Duration) -> Option<MetricSummary> {
        match self {
            Self::Rate(r) => Some(r.window_summary(now, window)),
            Self::Trend(t) => Some(t.window_summary(now, window)),
            Self::Counter(_) | Self::Gauge(_) => None,
        }
    }
}
