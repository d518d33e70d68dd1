//! Terminal summary printed after a run

use colored::Colorize;

use crate::deploy::RunSummary;
use crate::errors::DeployError;
use crate::health::HealthReport;

fn mark(ok: bool) -> colored::ColoredString {
    if ok {
        "ok".green()
    } else {
        "FAIL".red()
    }
}

/// Lines of the per-node health table
pub fn health_lines(report: &HealthReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}",
        report.host,
        if report.overall_status() { "healthy" } else { "unhealthy" }
    )];
    for (name, result, gating) in report.checks() {
        let note = if gating { "" } else { " (informational)" };
        lines.push(format!("  [{}] {}{}: {}", mark(result.ok), name, note, result.detail.trim()));
    }
    lines
}

pub fn print_summary(result: &Result<RunSummary, DeployError>) {
    println!();
    match result {
        Ok(summary) => {
            let title = if summary.dry_run {
                "Dry run finished"
            } else {
                "Deployment finished"
            };
            println!("{} ({} mode, run {})", title.green().bold(), summary.mode, summary.run_id);
            for stage in &summary.stages {
                println!("  [{}] {}", mark(stage.success), stage.stage);
            }
            if summary.provisioning_elided {
                println!("  {}", "install, service and health stages skipped".yellow());
            }
            for report in &summary.reports {
                for line in health_lines(report) {
                    println!("{}", line);
                }
            }
            let elapsed = summary.finished_at - summary.started_at;
            println!("Targets: {} in {}s", summary.targets.join(", "), elapsed.num_seconds());
        }
        Err(DeployError::Interrupted) => {
            println!("{}", "Deployment interrupted by operator".yellow().bold());
        }
        Err(e) => {
            println!("{} {}", "Deployment failed:".red().bold(), e);
            println!("See the log file for details.");
        }
    }
}
