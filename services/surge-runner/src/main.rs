use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use surge_core::RunConfig;
use surge_engine::ReqwestClient;
use surge_runner::reporter::ResultWriter;
use surge_runner::{execute, telemetry, Cli, EXIT_CONFIG_ERROR};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    telemetry::init_logging(config.log_format);

    match run(&cli, &config).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "load test aborted");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

async fn run(cli: &Cli, config: &RunConfig) -> anyhow::Result<i32> {
    if cli.print_plan {
        let plan = config.resolve_plan().context("failed to resolve test plan")?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(0);
    }

    let client = ReqwestClient::new(config.request_timeout()).context("failed to build HTTP client")?;
    let report = execute(config, Arc::new(client)).await?;

    let writer = ResultWriter::new(&report);
    writer
        .write_report(config.report.path.as_deref().map(Path::new), config.report.format)
        .context("failed to write report")?;

    if writer.passes() {
        tracing::info!(verdict = %report.verdict, "all thresholds passed");
    } else {
        tracing::warn!(
            verdict = %report.verdict,
            failures = %writer.failure_summary(),
            "load test did not pass"
        );
    }

    Ok(report.exit_code())
}
