//! Report rendering for finished runs

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use surge_core::metric::{
    CHECKS, ERRORS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS,
};
use surge_core::ReportFormat;
use surge_engine::{RunReport, Verdict};
use surge_metrics::MetricSummary;

/// Renders a [`RunReport`] as JSON or Markdown.
pub struct ResultWriter<'a> {
    report: &'a RunReport,
}

impl<'a> ResultWriter<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self { report }
    }

    pub fn passes(&self) -> bool {
        self.report.verdict == Verdict::Pass
    }

    /// One line per crossed threshold.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<String> = self
            .report
            .thresholds
            .failures()
            .map(|r| match r.actual {
                Some(actual) => format!("{} {} (actual {:.4})", r.metric, r.expression, actual),
                None => format!("{} {} (no data)", r.metric, r.expression),
            })
            .collect();

        if failures.is_empty() {
            return "All thresholds passed".to_string();
        }
        failures.join("\n")
    }

    pub fn render(&self, format: ReportFormat) -> anyhow::Result<String> {
        Ok(match format {
            ReportFormat::Json => serde_json::to_string_pretty(self.report)?,
            ReportFormat::Markdown => self.generate_markdown(),
        })
    }

    /// Write to `path`, or to stdout when `None`.
    pub fn write_report(&self, path: Option<&Path>, format: ReportFormat) -> anyhow::Result<()> {
        let content = self.render(format)?;
        match path {
            Some(path) => {
                let mut file = File::create(path)?;
                file.write_all(content.as_bytes())?;
            }
            None => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                handle.write_all(content.as_bytes())?;
                handle.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    fn generate_markdown(&self) -> String {
        let report = self.report;
        let status_emoji = match report.verdict {
            Verdict::Pass => "✅",
            Verdict::Fail => "❌",
            Verdict::Incomplete => "⚠️",
        };
        let metrics = &report.metrics;

        let mut out = String::new();
        let _ = writeln!(out, "# Load Test Report: {}", report.plan);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Status**: {} {}", status_emoji, report.verdict.to_string().to_uppercase());
        let _ = writeln!(out);
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Run ID**: {}", report.run_id);
        let _ = writeln!(out, "- **Seed**: {}", report.seed);
        let _ = writeln!(out, "- **Started**: {}", report.started_at.to_rfc3339());
        let _ = writeln!(out, "- **Duration**: {:.1} seconds", report.elapsed_secs);
        let _ = writeln!(out, "- **Stopped because**: {}", report.stop_reason);
        let _ = writeln!(out, "- **Total Requests**: {}", metrics.counter(HTTP_REQS).unwrap_or(0.0));
        let _ = writeln!(out, "- **Iterations**: {}", metrics.counter(ITERATIONS).unwrap_or(0.0));
        let _ = writeln!(
            out,
            "- **Failed Requests**: {:.2}%",
            metrics.rate(HTTP_REQ_FAILED).unwrap_or(0.0) * 100.0
        );
        let _ = writeln!(out, "- **Checks Passed**: {:.2}%", metrics.rate(CHECKS).unwrap_or(0.0) * 100.0);
        let _ = writeln!(out, "- **Error Rate**: {:.2}%", metrics.rate(ERRORS).unwrap_or(0.0) * 100.0);
        if report.aborted_vus > 0 {
            let _ = writeln!(out, "- **Aborted VUs**: {}", report.aborted_vus);
        }

        if let Some(trend) = metrics.trend(HTTP_REQ_DURATION) {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Latency ({})", HTTP_REQ_DURATION);
            let _ = writeln!(out);
            let _ = writeln!(out, "| Metric | Value |");
            let _ = writeln!(out, "|--------|-------|");
            let _ = writeln!(out, "| Avg | {:.2}ms |", trend.avg);
            let _ = writeln!(out, "| Median | {:.2}ms |", trend.med);
            let _ = writeln!(out, "| P90 | {:.2}ms |", trend.p90);
            let _ = writeln!(out, "| P95 | {:.2}ms |", trend.p95);
            let _ = writeln!(out, "| P99 | {:.2}ms |", trend.p99);
            let _ = writeln!(out, "| Max | {:.2}ms |", trend.max);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "## Thresholds");
        let _ = writeln!(out);
        if report.thresholds.results.is_empty() {
            let _ = writeln!(out, "No thresholds configured.");
        } else {
            let _ = writeln!(out, "| Metric | Expression | Window | Actual | Result |");
            let _ = writeln!(out, "|--------|------------|--------|--------|--------|");
            for result in &report.thresholds.results {
                let window = result
                    .window_secs
                    .map(|w| format!("{}s", w))
                    .unwrap_or_else(|| "-".to_string());
                let actual = result
                    .actual
                    .map(|a| format!("{:.4}", a))
                    .unwrap_or_else(|| "no data".to_string());
                let mark = if result.passed { "✅" } else { "❌" };
                let _ = writeln!(
                    out,
                    "| {} | `{}` | {} | {} | {} |",
                    result.metric, result.expression, window, actual, mark
                );
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "## Metrics");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Name | Type | Summary |");
        let _ = writeln!(out, "|------|------|---------|");
        for (name, summary) in &metrics.metrics {
            let _ = writeln!(out, "| {} | {} | {} |", name, summary.kind(), describe(summary));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
        let _ = writeln!(out, "**Generated**: {}", report.finished_at.to_rfc3339());
        out
    }
}

fn describe(summary: &MetricSummary) -> String {
    match summary {
        MetricSummary::Counter { count, rate } => format!("count={} rate={:.2}/s", count, rate),
        MetricSummary::Gauge { value, min, max, .. } => {
            format!("value={} min={} max={}", value, min, max)
        }
        MetricSummary::Rate { passes, fails, rate } => {
            format!("rate={:.4} ({} true / {} false)", rate, passes, fails)
        }
        MetricSummary::Trend(trend) if trend.count == 0 => "no data".to_string(),
        MetricSummary::Trend(trend) => format!(
            "avg={:.2} med={:.2} p95={:.2} p99={:.2} max={:.2} (n={})",
            trend.avg, trend.med, trend.p95, trend.p99, trend.max, trend.count
        ),
    }
}
