//! Output formatting for the CLI

use colored::Colorize;
use serde::Serialize;
use skyforge_common::TerminalStatus;
use skyforge_core::report::StageOutcome;
use skyforge_core::validation::Violation;
use skyforge_core::ProvisioningReport;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// One line of the run summary table
#[derive(Tabled)]
pub struct ReportRow {
    #[tabled(rename = "ENVIRONMENT")]
    environment: String,
    #[tabled(rename = "CLUSTER")]
    cluster: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "CAUSE")]
    cause: String,
    #[tabled(rename = "CAPACITY")]
    capacity: String,
    #[tabled(rename = "RUN")]
    run_id: String,
}

impl From<&ProvisioningReport> for ReportRow {
    fn from(report: &ProvisioningReport) -> Self {
        Self {
            environment: report
                .environment
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cluster: report.cluster_name.clone(),
            status: colorize_status(&report.status),
            cause: report
                .cause
                .as_ref()
                .map(|c| c.category.to_string())
                .unwrap_or_else(|| "-".to_string()),
            capacity: report
                .scaling
                .as_ref()
                .map(|s| s.confirmed_capacity.to_string())
                .unwrap_or_else(|| "-".to_string()),
            run_id: report.run_id.to_string(),
        }
    }
}

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "STAGE")]
    stage: String,
    #[tabled(rename = "OPERATION")]
    operation: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "DURATION")]
    duration: String,
}

#[derive(Tabled)]
struct ViolationRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
}

fn colorize_status(status: &TerminalStatus) -> String {
    let text = status.to_string();
    match status {
        TerminalStatus::Succeeded => text.green().to_string(),
        TerminalStatus::Partial(_) => text.yellow().to_string(),
        TerminalStatus::Failed(_) => text.red().to_string(),
    }
}

/// Print run reports in the specified format
pub fn print_reports(reports: &[ProvisioningReport], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Yaml => print_yaml(&reports)?,
        OutputFormat::Table => {
            for report in reports {
                println!(
                    "{} {} ({})",
                    "Cluster".bold(),
                    report.cluster_name.bold(),
                    colorize_status(&report.status)
                );
                print_table(report.stages.iter().map(stage_row).collect());
                if !report.violations.is_empty() {
                    print_violations(&report.violations);
                }
                println!();
            }
            print_table(reports.iter().map(ReportRow::from).collect());
        }
    }
    Ok(())
}

fn stage_row(record: &skyforge_core::report::StageRecord) -> StageRow {
    let outcome = match record.outcome {
        StageOutcome::Succeeded => "ok".green().to_string(),
        StageOutcome::Failed => "failed".red().to_string(),
    };
    StageRow {
        stage: record.stage.to_string(),
        operation: record.operation.clone(),
        outcome,
        attempts: record.attempts,
        duration: format_duration_ms(record.duration_ms),
    }
}

/// Print configuration violations as a table
pub fn print_violations(violations: &[Violation]) {
    print_table(
        violations
            .iter()
            .map(|v| ViolationRow {
                key: v.key.clone(),
                kind: v.kind.to_string(),
                message: v.message.clone(),
            })
            .collect(),
    );
}

/// Print data as a table using the tabled crate
pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No results found".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    println!("{}", yaml);
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Format a duration in milliseconds for the stage table
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        let m = secs / 60;
        let s = secs % 60;
        if s > 0 {
            format!("{}m {}s", m, s)
        } else {
            format!("{}m", m)
        }
    }
}
