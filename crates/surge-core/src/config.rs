//! Run configuration
//!
//! Sources, lowest to highest precedence:
//! 1. Hardcoded defaults
//! 2. `/etc/surge/surge.*` and `./config/surge.*`
//! 3. Config file named by `SURGE_CONFIG`
//! 4. `SURGE__*` environment variables (e.g. `SURGE__MAX_VUS=200`)
//! 5. Script-style variables `BASE_URL`, `TEST_TYPE`, `SCENARIO`, `SEED`

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::plan::TestPlan;
use crate::profiles::TestType;

/// Output format of the end-of-run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Markdown,
}

/// Console log layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,

    /// Write the report here instead of stdout.
    #[serde(default)]
    pub path: Option<String>,
}

/// Root configuration of a load test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root URL of the target service.
    pub base_url: String,

    /// Preset to run when no inline plan is given.
    pub test_type: String,

    /// Narrow the plan to one scenario.
    #[serde(default)]
    pub scenario: Option<String>,

    /// RNG seed; a random seed is drawn (and logged) when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Scheduling tick of the orchestrator.
    pub tick_interval_ms: u64,

    /// Upper bound on simultaneous network calls across all VUs.
    pub max_in_flight: usize,

    /// Upper bound on live VUs across all scenarios.
    pub max_vus: u32,

    pub request_timeout_secs: u64,

    /// How long stopping VUs may take to finish their current action.
    pub graceful_stop_secs: u64,

    /// Cancel the run (verdict incomplete) after this long.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    pub progress_interval_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub report: ReportConfig,

    /// Inline plan; replaces the preset selected by `test_type`.
    #[serde(default)]
    pub plan: Option<TestPlan>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            test_type: "smoke".to_string(),
            scenario: None,
            seed: None,
            tick_interval_ms: 100,
            max_in_flight: 256,
            max_vus: 1000,
            request_timeout_secs: 60,
            graceful_stop_secs: 60,
            max_duration_secs: None,
            progress_interval_secs: 10,
            log_format: LogFormat::default(),
            report: ReportConfig::default(),
            plan: None,
        }
    }
}

impl RunConfig {
    /// Load configuration from every source, then validate it.
    pub fn load() -> CoreResult<Self> {
        Self::load_from(std::env::var("SURGE_CONFIG").ok().as_deref())
    }

    /// Like [`load`](Self::load), with an explicit config file in place of `SURGE_CONFIG`.
    pub fn load_from(config_path: Option<&str>) -> CoreResult<Self> {
        let mut builder = Self::set_defaults(Config::builder())?;

        builder = builder
            .add_source(File::with_name("/etc/surge/surge").required(false))
            .add_source(File::with_name("./config/surge").required(false));

        if let Some(config_path) = config_path {
            builder = builder.add_source(File::with_name(config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SURGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder
            .set_override_option("base_url", std::env::var("BASE_URL").ok())?
            .set_override_option("test_type", std::env::var("TEST_TYPE").ok())?
            .set_override_option("scenario", std::env::var("SCENARIO").ok())?
            .set_override_option("seed", std::env::var("SEED").ok())?;

        let config: RunConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            base_url = %config.base_url,
            test_type = %config.test_type,
            scenario = ?config.scenario,
            "run configuration loaded"
        );

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = Self::default();
        builder
            .set_default("base_url", defaults.base_url)?
            .set_default("test_type", defaults.test_type)?
            .set_default("tick_interval_ms", defaults.tick_interval_ms)?
            .set_default("max_in_flight", defaults.max_in_flight as u64)?
            .set_default("max_vus", defaults.max_vus as u64)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs)?
            .set_default("graceful_stop_secs", defaults.graceful_stop_secs)?
            .set_default("progress_interval_secs", defaults.progress_interval_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(CoreError::config("base_url must not be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(CoreError::config(format!(
                "base_url `{}` must start with http:// or https://",
                self.base_url
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(CoreError::config("tick_interval_ms must be > 0"));
        }
        if self.max_in_flight == 0 {
            return Err(CoreError::config("max_in_flight must be > 0"));
        }
        if self.max_vus == 0 {
            return Err(CoreError::config("max_vus must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::config("request_timeout_secs must be > 0"));
        }
        if self.progress_interval_secs == 0 {
            return Err(CoreError::config("progress_interval_secs must be > 0"));
        }
        // A VU finishes its in-flight request before stopping.
        if self.graceful_stop_secs < self.request_timeout_secs {
            return Err(CoreError::config(format!(
                "graceful_stop_secs ({}) must be >= request_timeout_secs ({})",
                self.graceful_stop_secs, self.request_timeout_secs
            )));
        }
        self.test_type()?;
        Ok(())
    }

    pub fn test_type(&self) -> CoreResult<TestType> {
        self.test_type.parse()
    }

    /// Resolve the plan to run: the inline plan or the preset, narrowed by `scenario`.
    pub fn resolve_plan(&self) -> CoreResult<TestPlan> {
        let plan = match &self.plan {
            Some(plan) => plan.clone(),
            None => self.test_type()?.plan(),
        };
        let plan = match &self.scenario {
            Some(name) => plan.only_scenario(name)?,
            None => plan,
        };
        plan.validate(self.max_vus)?;
        Ok(plan)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Normalize the base URL so paths can be appended directly.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.test_type().unwrap(), TestType::Smoke);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = RunConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RunConfig {
            base_url: "localhost:8000".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RunConfig {
            test_type: "stress".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_graceful_stop_must_cover_request_timeout() {
        let config = RunConfig {
            request_timeout_secs: 60,
            graceful_stop_secs: 30,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("graceful_stop_secs"));

        let config = RunConfig {
            request_timeout_secs: 10,
            graceful_stop_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_plan_applies_scenario_filter() {
        let config = RunConfig {
            test_type: "scenarios".to_string(),
            scenario: Some("peak".to_string()),
            ..Default::default()
        };
        let plan = config.resolve_plan().unwrap();
        assert_eq!(plan.scenarios.len(), 1);
        assert_eq!(plan.scenarios[0].name, "peak");

        let config = RunConfig {
            test_type: "scenarios".to_string(),
            scenario: Some("stress".to_string()),
            ..Default::default()
        };
        assert!(config.resolve_plan().is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let config = RunConfig {
            base_url: "http://qr.local:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://qr.local:8000");
    }
}
