//! Test plans: scenarios plus thresholds, loaded once and immutable during a run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{serde_duration, serde_duration_opt};
use crate::error::{CoreError, CoreResult};
use crate::metric::{builtin_metrics, MetricDescriptor};
use crate::stage::Executor;
use crate::workload::Workload;

/// A named, independently scheduled workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,

    #[serde(flatten)]
    pub executor: Executor,

    /// Offset from run start at which this scenario begins.
    #[serde(default, with = "serde_duration")]
    pub start_time: Duration,

    pub workload: Workload,
}

impl ScenarioConfig {
    pub fn new(name: impl Into<String>, executor: Executor, workload: Workload) -> Self {
        Self {
            name: name.into(),
            executor,
            start_time: Duration::ZERO,
            workload,
        }
    }

    #[must_use]
    pub fn starting_at(mut self, offset: Duration) -> Self {
        self.start_time = offset;
        self
    }

    /// Run-relative instant after which this scenario never asks for VUs again.
    pub fn end_offset(&self) -> Duration {
        self.start_time + self.executor.total_duration()
    }
}

/// Pass/fail assertion on one metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub metric: String,

    /// Expression such as `p(95)<500` or `rate<0.1`.
    pub expression: String,

    /// Evaluate only observations from this trailing window.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_duration_opt")]
    pub window: Option<Duration>,
}

impl ThresholdSpec {
    pub fn new(metric: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            expression: expression.into(),
            window: None,
        }
    }

    #[must_use]
    pub fn over_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }
}

/// Everything needed to drive one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdSpec>,
}

impl TestPlan {
    /// Overall run length: latest scenario end.
    pub fn total_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(ScenarioConfig::end_offset)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Longest threshold window; collectors retain this much timestamped history.
    pub fn max_window(&self) -> Option<Duration> {
        self.thresholds.iter().filter_map(|t| t.window).max()
    }

    /// Built-in metrics plus every metric a workload in the plan records.
    pub fn metrics(&self) -> Vec<MetricDescriptor> {
        let mut by_name: BTreeMap<String, MetricDescriptor> = builtin_metrics()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        for scenario in &self.scenarios {
            for metric in scenario.workload.metrics() {
                by_name.entry(metric.name.clone()).or_insert(metric);
            }
        }
        by_name.into_values().collect()
    }

    /// Keep only the named scenario.
    pub fn only_scenario(mut self, name: &str) -> CoreResult<Self> {
        let available: Vec<String> = self.scenarios.iter().map(|s| s.name.clone()).collect();
        self.scenarios.retain(|s| s.name == name);
        if self.scenarios.is_empty() {
            return Err(CoreError::config(format!(
                "scenario `{}` not found in plan `{}` (available: {})",
                name,
                self.name,
                available.join(", ")
            )));
        }
        Ok(self)
    }

    /// Structural validation; threshold expressions are checked by the evaluator.
    pub fn validate(&self, max_vus: u32) -> CoreResult<()> {
        if self.scenarios.is_empty() {
            return Err(CoreError::config(format!("plan `{}` has no scenarios", self.name)));
        }

        let mut names = std::collections::HashSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(CoreError::config(format!(
                    "duplicate scenario name `{}`",
                    scenario.name
                )));
            }
            if let Executor::RampingVus { stages, .. } = &scenario.executor {
                if stages.is_empty() {
                    return Err(CoreError::config(format!(
                        "scenario `{}` has no stages",
                        scenario.name
                    )));
                }
            }
            scenario.workload.validate(&scenario.name)?;
        }

        let peak: u32 = self.scenarios.iter().map(|s| s.executor.peak_target()).sum();
        if peak > max_vus {
            return Err(CoreError::config(format!(
                "plan `{}` can reach {} VUs but max_vus is {}",
                self.name, peak, max_vus
            )));
        }

        Ok(())
    }
}
