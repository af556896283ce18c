//! Stages and executors: how a scenario's concurrency changes over time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;

/// One ramp segment: move toward `target` virtual users over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "serde_duration")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }

    /// Shorthand used by presets and tests.
    pub fn secs(secs: u64, target: u32) -> Self {
        Self::new(Duration::from_secs(secs), target)
    }

    pub fn mins(mins: u64, target: u32) -> Self {
        Self::new(Duration::from_secs(mins * 60), target)
    }
}

/// Executor kind of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
pub enum Executor {
    /// Fixed number of VUs for a fixed duration.
    ConstantVus {
        vus: u32,
        #[serde(with = "serde_duration")]
        duration: Duration,
    },

    /// Linearly interpolated VU count across stages.
    RampingVus {
        #[serde(default)]
        start_vus: u32,
        stages: Vec<Stage>,
    },
}

impl Executor {
    /// Time from scenario start until its concurrency drops to zero for good.
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::ConstantVus { duration, .. } => *duration,
            Self::RampingVus { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// Highest concurrency this executor can ask for.
    pub fn peak_target(&self) -> u32 {
        match self {
            Self::ConstantVus { vus, .. } => *vus,
            Self::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .chain(std::iter::once(*start_vus))
                .max()
                .unwrap_or(0),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::ConstantVus { vus, duration } => {
                format!("constant {} VUs for {:?}", vus, duration)
            }
            Self::RampingVus { start_vus, stages } => {
                let path: Vec<String> = stages
                    .iter()
                    .map(|s| format!("{}@{:?}", s.target, s.duration))
                    .collect();
                format!("ramping from {} VUs: {}", start_vus, path.join(" → "))
            }
        }
    }
}
