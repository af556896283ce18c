//! Stage scheduler: target concurrency as a pure function of elapsed time.

use std::time::Duration;

use surge_core::{Executor, ScenarioConfig};

/// Where a scenario is in its lifetime at some run-relative instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    /// Before its start offset.
    Pending,
    Active,
    /// Past its last stage; the target is zero from here on.
    Finished,
}

/// VUs the executor wants `elapsed` after the scenario started.
///
/// Ramping executors interpolate linearly from the previous stage's target
/// (or `start_vus` for the first stage) toward the current stage's target and
/// round to the nearest integer. Zero-length stages jump straight to their
/// target. Once the total duration has passed the result is zero.
pub fn target_concurrency(executor: &Executor, elapsed: Duration) -> u32 {
    match executor {
        Executor::ConstantVus { vus, duration } => {
            if elapsed < *duration {
                *vus
            } else {
                0
            }
        }
        Executor::RampingVus { start_vus, stages } => {
            let mut previous = f64::from(*start_vus);
            let mut stage_start = Duration::ZERO;

            for stage in stages {
                let stage_end = stage_start + stage.duration;
                if elapsed < stage_end {
                    let into_stage = elapsed.saturating_sub(stage_start).as_secs_f64();
                    let fraction = (into_stage / stage.duration.as_secs_f64()).clamp(0.0, 1.0);
                    let target = f64::from(stage.target);
                    return (previous + (target - previous) * fraction).round() as u32;
                }
                previous = f64::from(stage.target);
                stage_start = stage_end;
            }

            0
        }
    }
}

/// Target for a scenario at a run-relative instant, honoring its start offset.
pub fn scenario_target(scenario: &ScenarioConfig, run_elapsed: Duration) -> u32 {
    match run_elapsed.checked_sub(scenario.start_time) {
        Some(local) => target_concurrency(&scenario.executor, local),
        None => 0,
    }
}

/// Whether the stage active at `elapsed` moves the target up or down.
pub fn is_ramping(executor: &Executor, elapsed: Duration) -> bool {
    let Executor::RampingVus { start_vus, stages } = executor else {
        return false;
    };
    let mut previous = *start_vus;
    let mut stage_start = Duration::ZERO;
    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            return stage.target != previous;
        }
        previous = stage.target;
        stage_start = stage_end;
    }
    false
}

/// [`is_ramping`] at a run-relative instant.
pub fn scenario_is_ramping(scenario: &ScenarioConfig, run_elapsed: Duration) -> bool {
    run_elapsed
        .checked_sub(scenario.start_time)
        .is_some_and(|local| is_ramping(&scenario.executor, local))
}

pub fn scenario_phase(scenario: &ScenarioConfig, run_elapsed: Duration) -> ScenarioPhase {
    if run_elapsed < scenario.start_time {
        ScenarioPhase::Pending
    } else if run_elapsed >= scenario.end_offset() {
        ScenarioPhase::Finished
    } else {
        ScenarioPhase::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::{ActionKind, ActionSpec, Stage, Workload};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn warm_up_hold_ramp_down() -> Executor {
        Executor::RampingVus {
            start_vus: 0,
            stages: vec![Stage::secs(30, 5), Stage::secs(30, 5), Stage::secs(20, 0)],
        }
    }

    #[test]
    fn test_ramp_up_plateau_ramp_down() {
        let executor = warm_up_hold_ramp_down();
        assert_eq!(target_concurrency(&executor, secs(0)), 0);
        // round(5 * 15/30) = round(2.5) = 3
        assert_eq!(target_concurrency(&executor, secs(15)), 3);
        assert_eq!(target_concurrency(&executor, secs(30)), 5);
        assert_eq!(target_concurrency(&executor, secs(40)), 5);
        assert_eq!(target_concurrency(&executor, secs(60)), 5);
        // midpoint of 5 → 0
        assert_eq!(target_concurrency(&executor, secs(70)), 3);
        assert_eq!(target_concurrency(&executor, secs(76)), 1);
        assert_eq!(target_concurrency(&executor, secs(80)), 0);
        assert_eq!(target_concurrency(&executor, secs(500)), 0);
    }

    #[test]
    fn test_continuous_at_stage_boundary() {
        let executor = Executor::RampingVus {
            start_vus: 0,
            stages: vec![Stage::secs(10, 10), Stage::secs(10, 20)],
        };
        let just_before = Duration::from_millis(9_999);
        assert_eq!(target_concurrency(&executor, just_before), 10);
        assert_eq!(target_concurrency(&executor, secs(10)), 10);
        assert_eq!(target_concurrency(&executor, secs(15)), 15);
    }

    #[test]
    fn test_zero_duration_stage_jumps() {
        let executor = Executor::RampingVus {
            start_vus: 0,
            stages: vec![Stage::secs(0, 8), Stage::secs(10, 8)],
        };
        assert_eq!(target_concurrency(&executor, secs(0)), 8);
        assert_eq!(target_concurrency(&executor, secs(5)), 8);
    }

    #[test]
    fn test_start_vus_seeds_first_stage() {
        let executor = Executor::RampingVus {
            start_vus: 10,
            stages: vec![Stage::secs(10, 0)],
        };
        assert_eq!(target_concurrency(&executor, secs(0)), 10);
        assert_eq!(target_concurrency(&executor, secs(5)), 5);
    }

    #[test]
    fn test_constant_executor() {
        let executor = Executor::ConstantVus {
            vus: 3,
            duration: secs(10),
        };
        assert_eq!(target_concurrency(&executor, secs(0)), 3);
        assert_eq!(target_concurrency(&executor, Duration::from_millis(9_999)), 3);
        assert_eq!(target_concurrency(&executor, secs(10)), 0);
    }

    #[test]
    fn test_is_ramping() {
        let executor = warm_up_hold_ramp_down();
        assert!(is_ramping(&executor, secs(10)));
        assert!(!is_ramping(&executor, secs(45)));
        assert!(is_ramping(&executor, secs(65)));
        assert!(!is_ramping(&executor, secs(80)));
    }

    #[test]
    fn test_start_offset() {
        let scenario = surge_core::ScenarioConfig::new(
            "late",
            Executor::ConstantVus {
                vus: 2,
                duration: secs(5),
            },
            Workload::new().then(ActionSpec::new(ActionKind::HealthCheck)),
        )
        .starting_at(secs(10));

        assert_eq!(scenario_target(&scenario, secs(9)), 0);
        assert_eq!(scenario_phase(&scenario, secs(9)), ScenarioPhase::Pending);
        assert_eq!(scenario_target(&scenario, secs(10)), 2);
        assert_eq!(scenario_phase(&scenario, secs(12)), ScenarioPhase::Active);
        assert_eq!(scenario_target(&scenario, secs(15)), 0);
        assert_eq!(scenario_phase(&scenario, secs(15)), ScenarioPhase::Finished);
    }
}
