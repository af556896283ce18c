//! Test orchestrator: drives every scenario's pool off one shared clock,
//! drains at the end, evaluates thresholds and seals the run report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use surge_core::metric::{ERRORS, HTTP_REQS, HTTP_REQ_DURATION, VUS, VUS_MAX};
use surge_core::{CoreError, CoreResult, RunConfig, TestPlan};
use surge_metrics::{MetricSummary, MetricsCollector, MetricsSnapshot, ThresholdReport, ThresholdSet};
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::HttpClient;
use crate::executor::VirtualUserPool;
use crate::scheduler::{scenario_is_ramping, scenario_target};
use crate::user::{IterationScript, VuContext};

/// Run lifecycle: `Idle -> Ramping -> Running -> Draining -> Completed`.
///
/// `Running` is entered at the first tick where no scenario is ramping and
/// is kept through later ramps, including ramp-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Ramping,
    Running,
    Draining,
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ramping => "ramping",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// Cancelled, timed out or aborted before every stage completed.
    Incomplete,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Incomplete => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Incomplete => "incomplete",
        };
        f.write_str(name)
    }
}

/// Why the load phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every scenario ran all of its stages.
    Completed,
    Cancelled,
    MaxDuration,
    Fatal { message: String },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::MaxDuration => f.write_str("max duration reached"),
            Self::Fatal { message } => write!(f, "fatal: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub at_secs: f64,
    pub state: RunState,
}

/// Engine knobs that are not part of the plan.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub base_url: String,
    /// Random when absent; the chosen value is logged and reported.
    pub seed: Option<u64>,
    pub tick_interval: Duration,
    pub max_in_flight: usize,
    pub max_vus: u32,
    /// Longest a single request may take; the graceful stop must cover it.
    pub request_timeout: Duration,
    pub graceful_stop: Duration,
    pub max_duration: Option<Duration>,
    pub progress_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl RunOptions {
    /// Reject values the run loop cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.tick_interval.is_zero() {
            return Err(CoreError::config("tick_interval must be > 0"));
        }
        if self.progress_interval.is_zero() {
            return Err(CoreError::config("progress_interval must be > 0"));
        }
        if self.max_in_flight == 0 {
            return Err(CoreError::config("max_in_flight must be > 0"));
        }
        if self.max_vus == 0 {
            return Err(CoreError::config("max_vus must be > 0"));
        }
        if self.graceful_stop < self.request_timeout {
            return Err(CoreError::config(format!(
                "graceful_stop ({:?}) must be >= request_timeout ({:?})",
                self.graceful_stop, self.request_timeout
            )));
        }
        Ok(())
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            base_url: config.base_url().to_string(),
            seed: config.seed,
            tick_interval: config.tick_interval(),
            max_in_flight: config.max_in_flight,
            max_vus: config.max_vus,
            request_timeout: config.request_timeout(),
            graceful_stop: config.graceful_stop(),
            max_duration: config.max_duration(),
            progress_interval: config.progress_interval(),
        }
    }
}

/// Requests an in-progress run to stop. Cloneable and usable from any task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub state: RunState,
    pub stop_reason: StopReason,
    pub verdict: Verdict,
    pub transitions: Vec<StateTransition>,
    /// VUs cancelled after the graceful stop period expired.
    pub aborted_vus: usize,
    pub thresholds: ThresholdReport,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    /// 0 pass, 1 fail, 2 incomplete, 3 when the engine hit a fatal error.
    pub fn exit_code(&self) -> i32 {
        match self.stop_reason {
            StopReason::Fatal { .. } => 3,
            _ => self.verdict.exit_code(),
        }
    }
}

/// Owns one test run from validation to report.
pub struct LoadTestOrchestrator {
    run_id: Uuid,
    plan: TestPlan,
    options: RunOptions,
    seed: u64,
    client: Arc<dyn HttpClient>,
    collector: Arc<MetricsCollector>,
    thresholds: ThresholdSet,
    scripts: Vec<Arc<IterationScript>>,
    cancel: Arc<watch::Sender<bool>>,
    state: watch::Sender<RunState>,
}

impl std::fmt::Debug for LoadTestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTestOrchestrator")
            .field("run_id", &self.run_id)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl LoadTestOrchestrator {
    /// Validate the plan and compile thresholds. Any configuration error
    /// surfaces here, before a single request is sent.
    pub fn new(plan: TestPlan, options: RunOptions, client: Arc<dyn HttpClient>) -> CoreResult<Self> {
        options.validate()?;
        plan.validate(options.max_vus)?;

        let scripts = plan
            .scenarios
            .iter()
            .map(|s| IterationScript::compile(&s.name, &s.workload).map(Arc::new))
            .collect::<CoreResult<Vec<_>>>()?;

        let collector = Arc::new(MetricsCollector::with_retention(plan.max_window()));
        collector.declare(&plan.metrics())?;
        let thresholds = ThresholdSet::compile(&plan.thresholds, collector.as_ref())?;

        let seed = options.seed.unwrap_or_else(rand::random);
        let (cancel, _) = watch::channel(false);
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            run_id: Uuid::new_v4(),
            plan,
            options,
            seed,
            client,
            collector,
            thresholds,
            scripts,
            cancel: Arc::new(cancel),
            state,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Follow state changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Live collector, e.g. for progress displays.
    pub fn collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.collector)
    }

    /// Run to completion, cancellation or fatal error. Always yields a report.
    pub async fn run(self) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut transitions = Vec::new();

        info!(
            run_id = %self.run_id,
            plan = %self.plan.name,
            scenarios = self.plan.scenarios.len(),
            duration = ?self.plan.total_duration(),
            seed = self.seed,
            "starting load test"
        );
        for scenario in &self.plan.scenarios {
            info!(
                scenario = %scenario.name,
                start_time = ?scenario.start_time,
                executor = %scenario.executor.description(),
                "scenario scheduled"
            );
        }
        self.record_gauge(VUS_MAX, f64::from(self.options.max_vus));

        let mut pools = self.build_pools();
        self.transition(RunState::Ramping, start, &mut transitions);

        let reason = self.drive(&mut pools, start, &mut transitions).await;
        info!(reason = %reason, elapsed = ?start.elapsed(), "load phase ended");

        self.transition(RunState::Draining, start, &mut transitions);
        let aborted_vus = self.drain(&mut pools).await;
        drop(pools);
        self.record_gauge(VUS, 0.0);

        let thresholds = self.thresholds.evaluate(self.collector.as_ref());
        let verdict = match reason {
            StopReason::Completed if thresholds.pass => Verdict::Pass,
            StopReason::Completed => Verdict::Fail,
            _ => Verdict::Incomplete,
        };
        for failure in thresholds.failures() {
            warn!(
                metric = %failure.metric,
                expression = %failure.expression,
                actual = ?failure.actual,
                "threshold crossed"
            );
        }

        self.transition(RunState::Completed, start, &mut transitions);
        let metrics = self.collector.snapshot();
        let elapsed = start.elapsed();
        info!(
            verdict = %verdict,
            elapsed = ?elapsed,
            requests = metrics.counter(HTTP_REQS).unwrap_or(0.0),
            "load test complete"
        );

        RunReport {
            run_id: self.run_id,
            plan: self.plan.name.clone(),
            seed: self.seed,
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: elapsed.as_secs_f64(),
            state: RunState::Completed,
            stop_reason: reason,
            verdict,
            transitions,
            aborted_vus,
            thresholds,
            metrics,
        }
    }

    fn build_pools(&self) -> Vec<VirtualUserPool> {
        let limiter = Arc::new(Semaphore::new(self.options.max_in_flight));
        let base_url: Arc<str> = Arc::from(self.options.base_url.trim_end_matches('/'));
        let mut master = StdRng::seed_from_u64(self.seed);

        self.plan
            .scenarios
            .iter()
            .zip(&self.scripts)
            .map(|(scenario, script)| {
                let ctx = VuContext {
                    scenario: Arc::from(scenario.name.as_str()),
                    script: Arc::clone(script),
                    base_url: Arc::clone(&base_url),
                    client: Arc::clone(&self.client),
                    collector: Arc::clone(&self.collector),
                    limiter: Arc::clone(&limiter),
                };
                VirtualUserPool::new(ctx, master.gen())
            })
            .collect()
    }

    /// Tick loop: one elapsed reading per tick feeds every scenario.
    async fn drive(
        &self,
        pools: &mut [VirtualUserPool],
        start: Instant,
        transitions: &mut Vec<StateTransition>,
    ) -> StopReason {
        let mut cancel = self.cancel.subscribe();
        let mut ticker = interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let total = self.plan.total_duration();
        let mut targets = vec![0u32; pools.len()];
        let mut last_progress = Duration::ZERO;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.changed() => {}
            }

            if *cancel.borrow() {
                return StopReason::Cancelled;
            }
            let elapsed = start.elapsed();
            if self.options.max_duration.is_some_and(|limit| elapsed >= limit) {
                return StopReason::MaxDuration;
            }
            if elapsed >= total {
                return StopReason::Completed;
            }

            let demand: u64 = self
                .plan
                .scenarios
                .iter()
                .map(|s| u64::from(scenario_target(s, elapsed)))
                .sum();
            if demand > u64::from(self.options.max_vus) {
                return StopReason::Fatal {
                    message: format!(
                        "scenarios need {} VUs but max_vus is {}",
                        demand, self.options.max_vus
                    ),
                };
            }

            let scheduled = self.plan.scenarios.iter().zip(pools.iter_mut());
            for ((scenario, pool), previous) in scheduled.zip(targets.iter_mut()) {
                let target = scenario_target(scenario, elapsed);
                if target != *previous {
                    debug!(scenario = %scenario.name, target, elapsed = ?elapsed, "target changed");
                    *previous = target;
                }
                pool.reap();
                pool.reconcile(target as usize);
            }

            let active: usize = pools.iter().map(VirtualUserPool::active).sum();
            self.record_gauge(VUS, active as f64);

            // The lifecycle only moves forward: ramp-down and later ramps stay Running.
            if self.state() == RunState::Ramping
                && !self
                    .plan
                    .scenarios
                    .iter()
                    .any(|s| scenario_is_ramping(s, elapsed))
            {
                self.transition(RunState::Running, start, transitions);
            }

            if elapsed.saturating_sub(last_progress) >= self.options.progress_interval {
                last_progress = elapsed;
                self.log_progress(elapsed, active);
            }
        }
    }

    /// Stop every VU and wait up to `graceful_stop` for them to exit.
    /// Returns how many had to be aborted.
    async fn drain(&self, pools: &mut [VirtualUserPool]) -> usize {
        for pool in pools.iter_mut() {
            pool.stop_all();
        }

        let deadline = Instant::now() + self.options.graceful_stop;
        let mut ticker = interval(self.options.tick_interval);
        loop {
            let live: usize = pools
                .iter_mut()
                .map(|pool| {
                    pool.reap();
                    pool.live()
                })
                .sum();
            self.record_gauge(VUS, live as f64);

            if live == 0 {
                return 0;
            }
            if Instant::now() >= deadline {
                let aborted: usize = pools.iter_mut().map(VirtualUserPool::abort_all).sum();
                warn!(aborted, grace = ?self.options.graceful_stop, "graceful stop expired, aborted virtual users");
                return aborted;
            }
            ticker.tick().await;
        }
    }

    fn transition(&self, next: RunState, start: Instant, transitions: &mut Vec<StateTransition>) {
        let previous = self.state.send_replace(next);
        if previous == next && !transitions.is_empty() {
            return;
        }
        info!(from = %previous, to = %next, "run state changed");
        transitions.push(StateTransition {
            at_secs: start.elapsed().as_secs_f64(),
            state: next,
        });
    }

    fn record_gauge(&self, name: &str, value: f64) {
        if let Err(e) = self.collector.set(name, value) {
            warn!(metric = name, error = %e, "failed to record gauge");
        }
    }

    fn log_progress(&self, elapsed: Duration, active: usize) {
        let requests = match self.collector.summary(HTTP_REQS) {
            Some(MetricSummary::Counter { count, .. }) => count,
            _ => 0.0,
        };
        let p95 = match self.collector.summary(HTTP_REQ_DURATION) {
            Some(MetricSummary::Trend(trend)) => trend.p95,
            _ => 0.0,
        };
        let error_rate = match self.collector.summary(ERRORS) {
            Some(MetricSummary::Rate { rate, .. }) => rate,
            _ => 0.0,
        };
        info!(
            elapsed_secs = elapsed.as_secs(),
            vus = active,
            requests,
            p95_ms = %format!("{:.1}", p95),
            error_rate = %format!("{:.2}%", error_rate * 100.0),
            "progress"
        );
    }
}
