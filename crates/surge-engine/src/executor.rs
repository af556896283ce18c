//! Per-scenario pool of virtual users, reconciled toward a target count.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use crate::user::{StateCell, VirtualUser, VuContext, VuState};

struct VuHandle {
    id: u64,
    stop: watch::Sender<bool>,
    state: StateCell,
    task: JoinHandle<()>,
}

impl VuHandle {
    fn request_stop(&self) {
        // No receiver means the task already exited.
        let _ = self.stop.send(true);
    }

    /// True once the task has exited. Logs panics.
    fn reap(&mut self, scenario: &str) -> bool {
        if !self.task.is_finished() {
            return false;
        }
        if let Some(Err(e)) = (&mut self.task).now_or_never() {
            if e.is_panic() {
                error!(scenario, vu = self.id, "virtual user panicked");
            }
        }
        true
    }
}

/// Counts of VUs started and asked to stop by one reconcile call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub spawned: usize,
    pub retired: usize,
}

/// Spawns and retires the virtual users of one scenario.
///
/// Active VUs are kept oldest-first; scaling down signals the oldest ones.
/// Retired VUs finish their current step and are reaped on later ticks.
pub struct VirtualUserPool {
    ctx: VuContext,
    seed: u64,
    next_id: u64,
    active: VecDeque<VuHandle>,
    retiring: Vec<VuHandle>,
}

impl VirtualUserPool {
    pub fn new(ctx: VuContext, seed: u64) -> Self {
        Self {
            ctx,
            seed,
            next_id: 1,
            active: VecDeque::new(),
            retiring: Vec::new(),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.ctx.scenario
    }

    /// VUs that have not been asked to stop.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// VUs asked to stop whose task is still running.
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    /// Every VU task not yet reaped.
    pub fn live(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    pub fn is_drained(&self) -> bool {
        self.active.is_empty() && self.retiring.is_empty()
    }

    /// State of every unreaped VU, oldest first.
    pub fn states(&self) -> Vec<(u64, VuState)> {
        self.retiring
            .iter()
            .chain(self.active.iter())
            .map(|h| (h.id, h.state.get()))
            .collect()
    }

    /// Spawn or retire VUs so exactly `target` are active.
    pub fn reconcile(&mut self, target: usize) -> Reconciled {
        let mut outcome = Reconciled::default();

        while self.active.len() < target {
            self.spawn();
            outcome.spawned += 1;
        }
        while self.active.len() > target {
            if let Some(handle) = self.active.pop_front() {
                handle.request_stop();
                self.retiring.push(handle);
                outcome.retired += 1;
            }
        }

        if outcome != Reconciled::default() {
            debug!(
                scenario = %self.ctx.scenario,
                target,
                spawned = outcome.spawned,
                retired = outcome.retired,
                "reconciled virtual users"
            );
        }
        outcome
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = StateCell::new();
        let seed = self.seed ^ id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let user = VirtualUser::new(id, seed, self.ctx.clone(), stop_rx, state.clone());
        let span = info_span!("vu", scenario = %self.ctx.scenario, vu = id);
        let task = tokio::spawn(user.run().instrument(span));

        self.active.push_back(VuHandle {
            id,
            stop: stop_tx,
            state,
            task,
        });
    }

    /// Drop handles whose task has exited. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let scenario = Arc::clone(&self.ctx.scenario);
        let before = self.live();
        self.retiring.retain_mut(|h| !h.reap(&scenario));
        // An active VU only exits on its own by panicking; the next reconcile replaces it.
        self.active.retain_mut(|h| !h.reap(&scenario));
        before - self.live()
    }

    /// Ask every VU to stop.
    pub fn stop_all(&mut self) -> usize {
        self.reconcile(0).retired
    }

    /// Cancel every remaining VU task. Returns how many were aborted.
    pub fn abort_all(&mut self) -> usize {
        let mut aborted = 0;
        for handle in self.retiring.drain(..).chain(self.active.drain(..)) {
            if !handle.task.is_finished() {
                handle.task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl Drop for VirtualUserPool {
    fn drop(&mut self) {
        self.abort_all();
    }
}
