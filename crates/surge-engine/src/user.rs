//! A virtual user: one task looping over its scenario's workload.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use surge_core::metric::{ITERATIONS, ITERATION_DURATION};
use surge_core::{ActionSpec, CoreResult, SleepSpec, Step, Workload};
use surge_metrics::MetricsCollector;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::action::{build_request, execute};
use crate::client::HttpClient;
use crate::selector::{bernoulli, WeightedTable};

/// Lifecycle of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VuState {
    Spawning = 0,
    Running = 1,
    Sleeping = 2,
    Stopping = 3,
    Terminated = 4,
}

impl VuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Spawning,
            1 => Self::Running,
            2 => Self::Sleeping,
            3 => Self::Stopping,
            _ => Self::Terminated,
        }
    }
}

/// Shared view of a VU's state, readable from the pool.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(VuState::Spawning as u8)))
    }

    pub fn get(&self) -> VuState {
        VuState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: VuState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum ScriptStep {
    Action(ActionSpec),
    Weighted(WeightedTable<ActionSpec>),
    Maybe(f64, ActionSpec),
    Sleep(SleepSpec),
}

/// A workload with weighted steps precomputed into lookup tables.
#[derive(Debug)]
pub struct IterationScript {
    steps: Vec<ScriptStep>,
}

impl IterationScript {
    pub fn compile(scenario: &str, workload: &Workload) -> CoreResult<Self> {
        workload.validate(scenario)?;

        let mut steps = Vec::with_capacity(workload.steps.len());
        for step in &workload.steps {
            let compiled = match step {
                Step::Action { action } => ScriptStep::Action(action.clone()),
                Step::Weighted { choices } => ScriptStep::Weighted(
                    WeightedTable::new(choices.iter().map(|c| (c.action.clone(), c.weight)))
                        .map_err(|e| surge_core::CoreError::invalid_workload(scenario, e.to_string()))?,
                ),
                Step::Maybe {
                    probability,
                    action,
                } => ScriptStep::Maybe(*probability, action.clone()),
                Step::Sleep { sleep } => ScriptStep::Sleep(*sleep),
            };
            steps.push(compiled);
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Everything a scenario's VUs share.
#[derive(Clone)]
pub struct VuContext {
    pub scenario: Arc<str>,
    pub script: Arc<IterationScript>,
    pub base_url: Arc<str>,
    pub client: Arc<dyn HttpClient>,
    pub collector: Arc<MetricsCollector>,
    /// Caps requests in flight across the whole run.
    pub limiter: Arc<Semaphore>,
}

pub struct VirtualUser {
    id: u64,
    ctx: VuContext,
    rng: StdRng,
    stop: watch::Receiver<bool>,
    state: StateCell,
}

impl VirtualUser {
    pub fn new(id: u64, seed: u64, ctx: VuContext, stop: watch::Receiver<bool>, state: StateCell) -> Self {
        Self {
            id,
            ctx,
            rng: StdRng::seed_from_u64(seed),
            stop,
            state,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Loop over the workload until told to stop.
    ///
    /// The stop signal is checked before every step and interrupts sleeps.
    /// A request already in flight always completes and is recorded.
    pub async fn run(mut self) {
        self.state.set(VuState::Running);
        debug!("virtual user started");

        let mut iterations = 0u64;
        while !self.stop_requested() {
            let started = Instant::now();
            if !self.iterate().await {
                break;
            }
            iterations += 1;

            let millis = started.elapsed().as_secs_f64() * 1000.0;
            let collector = Arc::clone(&self.ctx.collector);
            self.report(|| {
                collector.add(ITERATIONS, 1.0)?;
                collector.time(ITERATION_DURATION, millis)
            });

            // A workload without sleeps against an instant backend must still yield.
            tokio::task::yield_now().await;
        }

        self.state.set(VuState::Stopping);
        debug!(iterations, "virtual user stopping");
        self.state.set(VuState::Terminated);
    }

    /// One pass over the script. Returns false when interrupted by a stop.
    async fn iterate(&mut self) -> bool {
        let script = Arc::clone(&self.ctx.script);
        for step in &script.steps {
            if self.stop_requested() {
                return false;
            }
            match step {
                ScriptStep::Action(action) => self.perform(action).await,
                ScriptStep::Weighted(table) => {
                    let action = table.choose(&mut self.rng);
                    self.perform(action).await;
                }
                ScriptStep::Maybe(probability, action) => {
                    if bernoulli(*probability, &mut self.rng) {
                        self.perform(action).await;
                    }
                }
                ScriptStep::Sleep(sleep) => {
                    let duration = self.sleep_duration(sleep);
                    if !self.pause(duration).await {
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn perform(&mut self, action: &ActionSpec) {
        let request = build_request(action, &self.ctx.base_url, &mut self.rng);
        trace!(action = action.label(), url = %request.url, "issuing request");

        // Waiting for a slot is not yet a request; a stop skips the action.
        let permit = tokio::select! {
            permit = self.ctx.limiter.acquire() => permit.ok(),
            _ = self.stop.changed() => None,
        };
        let Some(_permit) = permit else {
            return;
        };
        let observation = execute(action, self.ctx.client.as_ref(), request).await;

        if let Err(e) = observation.record(&self.ctx.collector) {
            warn!(error = %e, "failed to record observation");
        }
        if let Some(error) = &observation.error {
            debug!(action = %observation.label, error = %error, "request failed");
        } else if !observation.checks_passed() {
            let failed: Vec<&str> = observation.failed_checks().collect();
            debug!(
                action = %observation.label,
                status = observation.status,
                checks = ?failed,
                "checks failed"
            );
        }
    }

    fn sleep_duration(&mut self, sleep: &SleepSpec) -> Duration {
        match sleep {
            SleepSpec::Fixed { duration } => *duration,
            SleepSpec::Uniform { max } => max.mul_f64(self.rng.gen::<f64>()),
        }
    }

    /// Sleep unless stopped first. Returns false when the stop signal won.
    async fn pause(&mut self, duration: Duration) -> bool {
        self.state.set(VuState::Sleeping);
        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop.changed() => false,
        };
        self.state.set(VuState::Running);
        slept && !self.stop_requested()
    }

    fn stop_requested(&self) -> bool {
        // A dropped sender means the pool is gone.
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    fn report(&self, record: impl FnOnce() -> CoreResult<()>) {
        if let Err(e) = record() {
            warn!(error = %e, "failed to record iteration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use surge_core::{ActionKind, CheckPredicate};

    struct CountingClient {
        calls: AtomicU64,
    }

    #[async_trait]
    impl HttpClient for CountingClient {
        async fn request(&self, _request: HttpRequest) -> HttpResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            HttpResponse::new(200, "ok").with_timing(Duration::from_millis(50))
        }
    }

    fn context(workload: Workload, client: Arc<CountingClient>) -> VuContext {
        VuContext {
            scenario: Arc::from("test"),
            script: Arc::new(IterationScript::compile("test", &workload).unwrap()),
            base_url: Arc::from("http://localhost:8000"),
            client,
            collector: Arc::new(MetricsCollector::new()),
            limiter: Arc::new(Semaphore::new(16)),
        }
    }

    fn health() -> ActionSpec {
        ActionSpec::new(ActionKind::HealthCheck).check(
            "health check status is 200",
            CheckPredicate::StatusIn { statuses: vec![200] },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let client = Arc::new(CountingClient {
            calls: AtomicU64::new(0),
        });
        let workload = Workload::new().then(health()).sleep(SleepSpec::Fixed {
            duration: Duration::from_secs(3600),
        });
        let ctx = context(workload, Arc::clone(&client));
        let collector = Arc::clone(&ctx.collector);

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = StateCell::new();
        let vu = VirtualUser::new(1, 7, ctx, stop_rx, state.clone());
        let handle = tokio::spawn(vu.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.get(), VuState::Sleeping);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(state.get(), VuState::Terminated);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        // Interrupted iteration is not counted.
        assert_eq!(collector.snapshot().counter(ITERATIONS), None);
        assert_eq!(collector.snapshot().counter("http_reqs"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_iterations_recorded() {
        let client = Arc::new(CountingClient {
            calls: AtomicU64::new(0),
        });
        let workload = Workload::new().then(health()).sleep(SleepSpec::Fixed {
            duration: Duration::from_millis(950),
        });
        let ctx = context(workload, Arc::clone(&client));
        let collector = Arc::clone(&ctx.collector);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(VirtualUser::new(1, 7, ctx, stop_rx, StateCell::new()).run());

        // Each iteration takes 50ms of request plus 950ms of sleep.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter(ITERATIONS), Some(10.0));
        assert_eq!(snapshot.counter("http_reqs"), Some(11.0));
        assert_eq!(snapshot.rate("checks"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_user() {
        let client = Arc::new(CountingClient {
            calls: AtomicU64::new(0),
        });
        let workload = Workload::new().then(health());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(
            VirtualUser::new(1, 7, context(workload, client), stop_rx, StateCell::new()).run(),
        );
        drop(stop_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
