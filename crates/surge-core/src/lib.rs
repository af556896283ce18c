//! Core domain types for the surge load generator: plans, scenarios, stages,
//! workloads, thresholds, run configuration and the error taxonomy.

pub mod config;
pub mod duration;
pub mod error;
pub mod metric;
pub mod plan;
pub mod profiles;
pub mod stage;
pub mod workload;

pub use config::{LogFormat, ReportConfig, ReportFormat, RunConfig};
pub use duration::parse_duration;
pub use error::{CoreError, CoreResult};
pub use metric::{MetricDescriptor, MetricKind};
pub use plan::{ScenarioConfig, TestPlan, ThresholdSpec};
pub use profiles::TestType;
pub use stage::{Executor, Stage};
pub use workload::{
    ActionKind, ActionSpec, CheckPredicate, CheckSpec, QrPayload, SleepSpec, Step, UrlSource,
    WeightedAction, Workload,
};
