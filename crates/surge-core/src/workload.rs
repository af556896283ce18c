//! Declarative workloads: actions, checks and the steps of one iteration.
//!
//! A workload is pure data. The engine interprets it; nothing here performs
//! I/O, which keeps weighted dispatch a table lookup instead of control flow
//! hidden in closures.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;
use crate::error::{CoreError, CoreResult};
use crate::metric::{MetricDescriptor, MetricKind};

/// Request payload for QR generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub url: UrlSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_color: Option<String>,
}

impl QrPayload {
    /// Payload with only a URL; the service fills in rendering defaults.
    pub fn url_only(url: UrlSource) -> Self {
        Self {
            url,
            box_size: None,
            border: None,
            fill_color: None,
            back_color: None,
        }
    }

    /// Payload with explicit rendering options (box 10, border 4, black on white).
    pub fn styled(url: UrlSource) -> Self {
        Self {
            url,
            box_size: Some(10),
            border: Some(4),
            fill_color: Some("black".to_string()),
            back_color: Some("white".to_string()),
        }
    }
}

/// Where the encoded URL comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    /// Same URL on every request.
    Fixed(String),
    /// Random host from the list plus a per-request session suffix.
    Randomized { hosts: Vec<String> },
}

/// The kind of request an action issues against the target service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// `GET /health`
    HealthCheck,
    /// `POST /qr/generate`
    GenerateQr(QrPayload),
    /// `GET /stats/`
    StatsRequest,
    /// `GET` of a static file, `/static/index.html` by default.
    StaticAsset {
        #[serde(default = "default_static_path")]
        path: String,
    },
}

fn default_static_path() -> String {
    "/static/index.html".to_string()
}

impl ActionKind {
    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::GenerateQr(_) => "qr_generate",
            Self::StatsRequest => "stats_request",
            Self::StaticAsset { .. } => "static_asset",
        }
    }

    /// Per-action latency trend.
    pub fn trend_metric(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check_duration",
            Self::GenerateQr(_) => "qr_generate_duration",
            Self::StatsRequest => "stats_request_duration",
            Self::StaticAsset { .. } => "static_asset_duration",
        }
    }
}

/// Boolean predicate over a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckPredicate {
    StatusIn { statuses: Vec<u16> },
    HeaderContains { header: String, value: String },
    HeaderEquals { header: String, value: String },
    BodyNotEmpty,
    JsonFieldEquals { field: String, value: serde_json::Value },
    JsonFieldPresent { field: String },
    JsonFieldIsNumber { field: String },
    JsonFieldAtLeast { field: String, min: f64 },
}

/// A named check, reported into the `checks` rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub predicate: CheckPredicate,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, predicate: CheckPredicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

/// A single request plus the checks applied to its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: ActionKind,

    /// Label used in logs, e.g. `"Soak: Generate QR Code"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Statuses counted as success for `http_req_failed` and the success counter.
    #[serde(default = "default_expected_statuses")]
    pub expected_statuses: Vec<u16>,

    #[serde(default)]
    pub checks: Vec<CheckSpec>,

    /// Counter incremented once per successful response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_counter: Option<String>,
}

fn default_expected_statuses() -> Vec<u16> {
    vec![200]
}

impl ActionSpec {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            group: None,
            expected_statuses: default_expected_statuses(),
            checks: Vec::new(),
            success_counter: None,
        }
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn expect_statuses(mut self, statuses: &[u16]) -> Self {
        self.expected_statuses = statuses.to_vec();
        self
    }

    #[must_use]
    pub fn check(mut self, name: impl Into<String>, predicate: CheckPredicate) -> Self {
        self.checks.push(CheckSpec::new(name, predicate));
        self
    }

    #[must_use]
    pub fn count_successes(mut self, counter: impl Into<String>) -> Self {
        self.success_counter = Some(counter.into());
        self
    }

    /// Label for logs: the group if set, otherwise the action name.
    pub fn label(&self) -> &str {
        self.group.as_deref().unwrap_or_else(|| self.kind.name())
    }

    pub fn is_expected_status(&self, status: u16) -> bool {
        self.expected_statuses.contains(&status)
    }
}

/// One entry of a weighted mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedAction {
    pub weight: f64,
    pub action: ActionSpec,
}

/// Pause between actions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SleepSpec {
    Fixed {
        #[serde(with = "serde_duration")]
        duration: Duration,
    },
    /// Uniformly random in `[0, max)`.
    Uniform {
        #[serde(with = "serde_duration")]
        max: Duration,
    },
}

/// One step of an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Always run the action.
    Action { action: ActionSpec },
    /// Run exactly one action chosen by weight.
    Weighted { choices: Vec<WeightedAction> },
    /// Run the action with independent probability `probability`.
    Maybe { probability: f64, action: ActionSpec },
    /// Suspend the virtual user.
    Sleep { sleep: SleepSpec },
}

/// The body of a virtual user's loop.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Workload {
    pub steps: Vec<Step>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then(mut self, action: ActionSpec) -> Self {
        self.steps.push(Step::Action { action });
        self
    }

    #[must_use]
    pub fn weighted(mut self, choices: Vec<(f64, ActionSpec)>) -> Self {
        let choices = choices
            .into_iter()
            .map(|(weight, action)| WeightedAction { weight, action })
            .collect();
        self.steps.push(Step::Weighted { choices });
        self
    }

    #[must_use]
    pub fn maybe(mut self, probability: f64, action: ActionSpec) -> Self {
        self.steps.push(Step::Maybe {
            probability,
            action,
        });
        self
    }

    #[must_use]
    pub fn sleep(mut self, sleep: SleepSpec) -> Self {
        self.steps.push(Step::Sleep { sleep });
        self
    }

    /// Every action the workload can issue.
    pub fn actions(&self) -> Vec<&ActionSpec> {
        let mut out = Vec::new();
        for step in &self.steps {
            match step {
                Step::Action { action } | Step::Maybe { action, .. } => out.push(action),
                Step::Weighted { choices } => out.extend(choices.iter().map(|c| &c.action)),
                Step::Sleep { .. } => {}
            }
        }
        out
    }

    /// Metrics recorded on top of the built-in set.
    pub fn metrics(&self) -> Vec<MetricDescriptor> {
        let mut seen = BTreeMap::new();
        for action in self.actions() {
            seen.insert(action.kind.trend_metric().to_string(), MetricKind::Trend);
            if let Some(counter) = &action.success_counter {
                seen.insert(counter.clone(), MetricKind::Counter);
            }
        }
        seen.into_iter()
            .map(|(name, kind)| MetricDescriptor::new(name, kind))
            .collect()
    }

    pub fn validate(&self, scenario: &str) -> CoreResult<()> {
        if self.actions().is_empty() {
            return Err(CoreError::invalid_workload(scenario, "workload issues no actions"));
        }

        for step in &self.steps {
            match step {
                Step::Weighted { choices } => {
                    if choices.is_empty() {
                        return Err(CoreError::invalid_workload(scenario, "weighted step has no choices"));
                    }
                    if choices.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0) {
                        return Err(CoreError::invalid_workload(
                            scenario,
                            "weights must be finite and non-negative",
                        ));
                    }
                    if choices.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
                        return Err(CoreError::invalid_workload(scenario, "weights sum to zero"));
                    }
                }
                Step::Maybe { probability, .. } => {
                    if !(0.0..=1.0).contains(probability) {
                        return Err(CoreError::invalid_workload(
                            scenario,
                            format!("probability {} is outside [0, 1]", probability),
                        ));
                    }
                }
                Step::Action { .. } | Step::Sleep { .. } => {}
            }
        }

        for action in self.actions() {
            if action.expected_statuses.is_empty() {
                return Err(CoreError::invalid_workload(
                    scenario,
                    format!("action `{}` declares no expected statuses", action.label()),
                ));
            }
        }

        Ok(())
    }
}
