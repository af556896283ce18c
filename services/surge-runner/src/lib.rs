//! Command-line runner for surge load tests.

pub mod reporter;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use surge_core::{ReportFormat, RunConfig};
use surge_engine::{HttpClient, LoadTestOrchestrator, RunOptions, RunReport};
use tracing::{error, info};

/// Exit status for configuration and fatal errors.
pub const EXIT_CONFIG_ERROR: i32 = 3;

#[derive(Parser, Debug, Default)]
#[command(name = "surge")]
#[command(about = "Stage-driven HTTP load generator", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file; replaces SURGE_CONFIG
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Root URL of the service under test
    #[arg(long)]
    pub base_url: Option<String>,

    /// Preset plan: smoke, soak, peak or scenarios
    #[arg(long)]
    pub test_type: Option<String>,

    /// Run only this scenario of the plan
    #[arg(long)]
    pub scenario: Option<String>,

    /// RNG seed for reproducible traffic
    #[arg(long)]
    pub seed: Option<u64>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub max_duration_secs: Option<u64>,

    /// Report format: json or markdown
    #[arg(long, value_parser = parse_report_format)]
    pub format: Option<ReportFormat>,

    /// Write the report to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Print the resolved plan as JSON and exit
    #[arg(long)]
    pub print_plan: bool,
}

fn parse_report_format(raw: &str) -> Result<ReportFormat, String> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Ok(ReportFormat::Json),
        "markdown" | "md" => Ok(ReportFormat::Markdown),
        other => Err(format!("unknown report format `{}`", other)),
    }
}

impl Cli {
    /// Load layered configuration, then apply command-line overrides on top.
    pub fn load_config(&self) -> anyhow::Result<RunConfig> {
        let path = self.config.as_ref().map(|p| p.to_string_lossy().into_owned());
        let mut config = match path {
            Some(path) => RunConfig::load_from(Some(&path)),
            None => RunConfig::load(),
        }
        .context("failed to load configuration")?;

        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(test_type) = &self.test_type {
            config.test_type = test_type.clone();
        }
        if let Some(scenario) = &self.scenario {
            config.scenario = Some(scenario.clone());
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(secs) = self.max_duration_secs {
            config.max_duration_secs = Some(secs);
        }
        if let Some(format) = self.format {
            config.report.format = format;
        }
        if let Some(output) = &self.output {
            config.report.path = Some(output.to_string_lossy().into_owned());
        }
    }
}

/// Resolve the plan, run it, and return the report.
///
/// Ctrl-C or SIGTERM cancels the run; the report is still produced.
pub async fn execute(config: &RunConfig, client: Arc<dyn HttpClient>) -> anyhow::Result<RunReport> {
    let plan = config.resolve_plan().context("failed to resolve test plan")?;
    let orchestrator = LoadTestOrchestrator::new(plan, RunOptions::from(config), client)
        .context("invalid test plan")?;

    let cancel = orchestrator.cancel_handle();
    let signal = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let report = orchestrator.run().await;
    signal.abort();
    Ok(report)
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal, stopping virtual users");
        }
        _ = terminate => {
            info!("Received SIGTERM signal, stopping virtual users");
        }
    }
}
