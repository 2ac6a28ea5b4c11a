//! Run report
//!
//! The report is the only thing a run returns. It records every attempted
//! stage, success or not, plus the handles the run produced.

use crate::cluster::ClusterHandle;
use crate::error::ProvisionError;
use crate::monitoring::AlarmHandle;
use crate::role::RoleHandle;
use crate::scaling::ScalingResult;
use crate::validation::Violation;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use skyforge_common::{CauseCategory, Environment, Stage, TerminalStatus};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
}

/// Outcome of one attempted stage operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub operation: String,
    pub outcome: StageOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why a run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub category: CauseCategory,
    pub message: String,
}

impl From<&ProvisionError> for FailureCause {
    fn from(err: &ProvisionError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

fn status_string<S: Serializer>(status: &TerminalStatus, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(status)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningReport {
    pub run_id: Uuid,
    pub cluster_name: String,
    pub environment: Option<Environment>,
    #[serde(serialize_with = "status_string")]
    pub status: TerminalStatus,
    pub cause: Option<FailureCause>,
    pub stages: Vec<StageRecord>,
    pub role: Option<RoleHandle>,
    pub cluster: Option<ClusterHandle>,
    pub alarms: Option<AlarmHandle>,
    pub scaling: Option<ScalingResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningReport {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Last record for `stage`
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }

    /// Whether `stage` was attempted and succeeded
    pub fn stage_succeeded(&self, stage: Stage) -> bool {
        self.stage(stage)
            .map(|r| r.outcome == StageOutcome::Succeeded)
            .unwrap_or(false)
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.stages.iter().any(|r| r.stage == stage)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering, one line per fact
    pub fn log_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "run {} cluster={} environment={} status={}{}",
            self.run_id,
            self.cluster_name,
            self.environment.map(|e| e.as_str()).unwrap_or("-"),
            self.status,
            if self.dry_run { " (dry run)" } else { "" }
        )];

        for record in &self.stages {
            let marker = match record.outcome {
                StageOutcome::Succeeded => "ok",
                StageOutcome::Failed => "FAILED",
            };
            let mut line = format!(
                "  [{}] {} {} {}ms attempts={}",
                marker, record.stage, record.operation, record.duration_ms, record.attempts
            );
            if let Some(detail) = &record.detail {
                line.push_str(": ");
                line.push_str(detail);
            }
            lines.push(line);
        }

        for violation in &self.violations {
            lines.push(format!("  violation {}", violation));
        }

        if let Some(cause) = &self.cause {
            lines.push(format!("  cause {}: {}", cause.category, cause.message));
        }

        if let Some(cluster) = &self.cluster {
            lines.push(format!(
                "  cluster {} state={}{}",
                cluster.arn,
                cluster.state,
                if cluster.adopted { " (adopted)" } else { "" }
            ));
        }

        if let Some(scaling) = &self.scaling {
            lines.push(format!(
                "  scaling {} requested={} confirmed={} bounds=[{}, {}]",
                scaling.group_name,
                scaling.requested_capacity,
                scaling.confirmed_capacity,
                scaling.min_size,
                scaling.max_size
            ));
        }

        for warning in &self.warnings {
            lines.push(format!("  warning {}", warning));
        }

        lines
    }

    /// Write the report to the log at a level matching its status
    pub fn emit(&self) {
        for line in self.log_lines() {
            match self.status {
                TerminalStatus::Succeeded => info!(run_id = %self.run_id, "{}", line),
                TerminalStatus::Partial(_) => warn!(run_id = %self.run_id, "{}", line),
                TerminalStatus::Failed(_) => error!(run_id = %self.run_id, "{}", line),
            }
        }
    }
}

/// Start of a timed stage operation
pub(crate) struct StageTimer {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StageTimer {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Accumulates a report while a run is in flight
pub(crate) struct ReportBuilder {
    run_id: Uuid,
    cluster_name: String,
    environment: Option<Environment>,
    started_at: DateTime<Utc>,
    stages: Vec<StageRecord>,
    pub(crate) role: Option<RoleHandle>,
    pub(crate) cluster: Option<ClusterHandle>,
    pub(crate) alarms: Option<AlarmHandle>,
    pub(crate) scaling: Option<ScalingResult>,
    pub(crate) violations: Vec<Violation>,
    warnings: Vec<String>,
    dry_run: bool,
}

impl ReportBuilder {
    pub(crate) fn new(run_id: Uuid, cluster_name: &str, environment: Option<Environment>) -> Self {
        Self {
            run_id,
            cluster_name: cluster_name.to_string(),
            environment,
            started_at: Utc::now(),
            stages: Vec::new(),
            role: None,
            cluster: None,
            alarms: None,
            scaling: None,
            violations: Vec::new(),
            warnings: Vec::new(),
            dry_run: false,
        }
    }

    pub(crate) fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn identify(&mut self, cluster_name: &str, environment: Environment) {
        self.cluster_name = cluster_name.to_string();
        self.environment = Some(environment);
    }

    pub(crate) fn dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub(crate) fn warn(&mut self, warnings: impl IntoIterator<Item = String>) {
        for warning in warnings {
            warn!(cluster = %self.cluster_name, "{}", warning);
            self.warnings.push(warning);
        }
    }

    pub(crate) fn record(
        &mut self,
        stage: Stage,
        operation: &str,
        timer: StageTimer,
        attempts: u32,
        outcome: Result<Option<String>, &ProvisionError>,
    ) {
        let (outcome, detail) = match outcome {
            Ok(detail) => (StageOutcome::Succeeded, detail),
            Err(e) => (StageOutcome::Failed, Some(e.to_string())),
        };

        self.stages.push(StageRecord {
            stage,
            operation: operation.to_string(),
            outcome,
            started_at: timer.started_at,
            duration_ms: timer.started.elapsed().as_millis() as u64,
            attempts,
            detail,
        });
    }

    pub(crate) fn finish(self, status: TerminalStatus, cause: Option<FailureCause>) -> ProvisioningReport {
        ProvisioningReport {
            run_id: self.run_id,
            cluster_name: self.cluster_name,
            environment: self.environment,
            status,
            cause,
            stages: self.stages,
            role: self.role,
            cluster: self.cluster,
            alarms: self.alarms,
            scaling: self.scaling,
            violations: self.violations,
            warnings: self.warnings,
            dry_run: self.dry_run,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
