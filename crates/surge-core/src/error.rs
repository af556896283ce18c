use thiserror::Error;

/// Canonical error type for load test configuration and orchestration.
///
/// Transient action failures (refused connections, unexpected statuses, failed
/// checks) are never represented here; they are recorded as metric
/// observations instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Run configuration or plan is malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the problem.
        message: String,
    },

    /// Threshold expression could not be parsed or does not fit its metric.
    #[error("invalid threshold `{expression}` on metric `{metric}`: {reason}")]
    InvalidThreshold {
        /// Metric the threshold is attached to.
        metric: String,
        /// Raw expression string (e.g. `"p(95)<500"`).
        expression: String,
        /// Why the expression was rejected.
        reason: String,
    },

    /// Threshold references a metric that the plan never records.
    #[error("threshold references unknown metric `{name}`")]
    UnknownMetric {
        /// Name of the undeclared metric.
        name: String,
    },

    /// Workload definition is unusable (empty mix, bad weights, bad probability).
    #[error("invalid workload in scenario `{scenario}`: {message}")]
    InvalidWorkload {
        /// Scenario owning the workload.
        scenario: String,
        /// Human-readable description of the problem.
        message: String,
    },

    /// Fatal orchestration failure; the run is aborted and marked incomplete.
    #[error("orchestration failure: {message}")]
    Orchestration {
        /// Human-readable description of the failure.
        message: String,
    },

    /// Operation violates the run state machine.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred while reading configuration or writing reports.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl CoreError {
    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn invalid_threshold(
        metric: impl Into<String>,
        expression: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidThreshold {
            metric: metric.into(),
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `UnknownMetric` variant.
    #[must_use]
    pub fn unknown_metric(name: impl Into<String>) -> Self {
        Self::UnknownMetric { name: name.into() }
    }

    /// Creates an `InvalidWorkload` variant.
    #[must_use]
    pub fn invalid_workload(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidWorkload {
            scenario: scenario.into(),
            message: message.into(),
        }
    }

    /// Creates an `Orchestration` variant.
    #[must_use]
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration {
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for errors that must be reported before any traffic is generated.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidThreshold { .. }
                | Self::UnknownMetric { .. }
                | Self::InvalidWorkload { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
