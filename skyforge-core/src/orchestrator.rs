//! Provisioning state machine
//!
//! Drives one run through role resolution, cluster creation, readiness
//! polling, monitoring and scaling. Every attempted stage is recorded and
//! the run always ends in a report, never in an error.

use crate::cancel::CancelSignal;
use crate::cluster::{ClusterHandle, ClusterProvisioner, PollPolicy, DEFAULT_KUBERNETES_VERSION};
use crate::error::ProvisionError;
use crate::lock::RunLocks;
use crate::monitoring::{AlarmThresholds, HealthMonitorConfigurer};
use crate::provider::{ProviderContext, ProviderSet};
use crate::report::{FailureCause, ProvisioningReport, ReportBuilder, StageTimer};
use crate::retry::RetryPolicy;
use crate::role::{RoleHandle, RoleProvisioner};
use crate::scaling::CapacityScaler;
use crate::validation::{
    ConfigError, ConfigValidator, ProvisioningConfig, SecretsSignal, DEFAULT_ENVIRONMENT,
};
use crate::{log_provider_call, log_stage};
use futures::future::join_all;
use serde_json::{Map, Value};
use skyforge_common::{Environment, Stage, TerminalStatus};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Tunables for a run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub thresholds: AlarmThresholds,
    pub default_region: String,
    pub default_kubernetes_version: String,
    pub request_timeout: Duration,
    /// Environment assumed for files that do not name one
    pub default_environment: Environment,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            thresholds: AlarmThresholds::default(),
            default_region: "us-east-1".to_string(),
            default_kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            default_environment: DEFAULT_ENVIRONMENT,
        }
    }
}

/// Where a run stands; each state owns the handles produced so far
enum RunState {
    Validating,
    RoleReady(RoleHandle),
    ClusterRequested(ClusterHandle),
    ClusterActive(ClusterHandle),
    MonitoringAttached(ClusterHandle),
    Finished(TerminalStatus, Option<FailureCause>),
}

impl RunState {
    /// Stage the next step works in
    fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validating => Some(Stage::Validating),
            Self::RoleReady(_) => Some(Stage::ClusterRequested),
            Self::ClusterRequested(_) => Some(Stage::Polling),
            Self::ClusterActive(_) => Some(Stage::MonitoringAttached),
            Self::MonitoringAttached(_) => Some(Stage::ScalingApplied),
            Self::Finished(..) => None,
        }
    }
}

/// Terminal state for `err` raised in `stage`
///
/// Monitoring and scaling run only once the cluster is active, so their
/// failures leave live provider state behind. Cancellation never counts as
/// partial.
fn failure(stage: Stage, err: &ProvisionError) -> RunState {
    let status = match (stage, err) {
        (_, ProvisionError::Cancelled) => TerminalStatus::Failed(stage),
        (Stage::MonitoringAttached | Stage::ScalingApplied, _) => TerminalStatus::Partial(stage),
        _ => TerminalStatus::Failed(stage),
    };
    RunState::Finished(status, Some(FailureCause::from(err)))
}

pub struct ProvisioningOrchestrator {
    validator: ConfigValidator,
    roles: RoleProvisioner,
    clusters: ClusterProvisioner,
    monitor: HealthMonitorConfigurer,
    scaler: CapacityScaler,
    settings: OrchestratorSettings,
    locks: RunLocks,
    dry_run: bool,
}

impl ProvisioningOrchestrator {
    pub fn new(providers: ProviderSet, settings: OrchestratorSettings) -> Self {
        Self {
            validator: ConfigValidator::new()
                .with_default_environment(settings.default_environment),
            roles: RoleProvisioner::new(providers.roles),
            clusters: ClusterProvisioner::new(providers.clusters)
                .with_default_version(&settings.default_kubernetes_version),
            monitor: HealthMonitorConfigurer::new(providers.alarms),
            scaler: CapacityScaler::new(providers.scaling),
            settings,
            locks: RunLocks::new(),
            dry_run: false,
        }
    }

    /// Mark reports as produced against a simulated provider
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check `raw` with the same rules `run` applies
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<ProvisioningConfig, ConfigError> {
        self.validator.validate(raw)
    }

    /// Validate `raw` and provision the cluster it describes
    pub async fn run(
        &self,
        raw: &Map<String, Value>,
        secrets: SecretsSignal,
        cancel: &CancelSignal,
    ) -> ProvisioningReport {
        let cluster_hint = raw
            .get("cluster_name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");
        let env_hint = raw
            .get("environment")
            .and_then(Value::as_str)
            .and_then(|e| e.parse::<Environment>().ok());

        let mut report = ReportBuilder::new(Uuid::new_v4(), cluster_hint, env_hint);
        report.dry_run(self.dry_run);
        report.warn(self.validator.validate_secrets(secrets));

        let timer = StageTimer::start();
        match self.validator.validate(raw) {
            Ok(config) => {
                report.record(Stage::Validating, "validate_config", timer, 1, Ok(None));
                self.execute(&config, report, cancel).await
            }
            Err(e) => {
                report.violations = e.violations().to_vec();
                let err = ProvisionError::Config(e);
                report.record(Stage::Validating, "validate_config", timer, 1, Err(&err));
                warn!(cluster = %cluster_hint, error = %err, "Configuration rejected");
                report.finish(
                    TerminalStatus::Failed(Stage::Validating),
                    Some(FailureCause::from(&err)),
                )
            }
        }
    }

    /// Provision an already validated configuration
    pub async fn run_config(
        &self,
        config: &ProvisioningConfig,
        secrets: SecretsSignal,
        cancel: &CancelSignal,
    ) -> ProvisioningReport {
        let mut report =
            ReportBuilder::new(Uuid::new_v4(), &config.cluster_name, Some(config.environment));
        report.dry_run(self.dry_run);
        report.warn(self.validator.validate_secrets(secrets));

        // A `ProvisioningConfig` only exists once validation has passed
        report.record(Stage::Validating, "validate_config", StageTimer::start(), 1, Ok(None));
        self.execute(config, report, cancel).await
    }

    /// Run several configurations concurrently, one report each, in order
    pub async fn provision_all(
        &self,
        configs: &[Map<String, Value>],
        secrets: SecretsSignal,
        cancel: &CancelSignal,
    ) -> Vec<ProvisioningReport> {
        join_all(configs.iter().map(|raw| self.run(raw, secrets, cancel))).await
    }

    async fn execute(
        &self,
        config: &ProvisioningConfig,
        mut report: ReportBuilder,
        cancel: &CancelSignal,
    ) -> ProvisioningReport {
        report.identify(&config.cluster_name, config.environment);

        let _guard = match self.locks.try_acquire(&config.cluster_name) {
            Ok(guard) => guard,
            Err(err) => {
                let timer = StageTimer::start();
                report.record(Stage::Validating, "acquire_run_lock", timer, 1, Err(&err));
                return report.finish(
                    TerminalStatus::Failed(Stage::Validating),
                    Some(FailureCause::from(&err)),
                );
            }
        };

        let ctx = ProviderContext {
            run_id: report.run_id(),
            region: config
                .region
                .clone()
                .unwrap_or_else(|| self.settings.default_region.clone()),
            request_timeout: self.settings.request_timeout,
        };
        info!(
            cluster = %config.cluster_name,
            environment = %config.environment,
            region = %ctx.region,
            run_id = %ctx.run_id,
            "Provisioning run started"
        );

        let mut state = RunState::Validating;
        loop {
            if let Some(stage) = state.stage() {
                if let Err(err) = cancel.check() {
                    warn!(cluster = %config.cluster_name, stage = %stage, "Run cancelled");
                    report.record(stage, "cancelled", StageTimer::start(), 0, Err(&err));
                    state = failure(stage, &err);
                }
            }

            state = match state {
                RunState::Validating => self.resolve_role(&ctx, config, &mut report, cancel).await,
                RunState::RoleReady(role) => {
                    self.request_cluster(&ctx, config, &role, &mut report, cancel).await
                }
                RunState::ClusterRequested(cluster) => {
                    self.await_active(&ctx, cluster, &mut report, cancel).await
                }
                RunState::ClusterActive(cluster) => {
                    self.attach_monitoring(&ctx, config, cluster, &mut report, cancel).await
                }
                RunState::MonitoringAttached(cluster) => {
                    self.apply_scaling(&ctx, config, &cluster, &mut report, cancel).await
                }
                RunState::Finished(status, cause) => {
                    let report = report.finish(status, cause);
                    info!(
                        cluster = %report.cluster_name,
                        status = %report.status,
                        run_id = %report.run_id,
                        "Provisioning run finished"
                    );
                    return report;
                }
            };
        }
    }

    async fn resolve_role(
        &self,
        ctx: &ProviderContext,
        config: &ProvisioningConfig,
        report: &mut ReportBuilder,
        cancel: &CancelSignal,
    ) -> RunState {
        log_provider_call!("ensure_role", ctx, config.role.describe());
        let timer = StageTimer::start();
        let (result, attempts) = self
            .settings
            .retry
            .run("ensure_role", cancel, |_| self.roles.ensure_role(ctx, &config.role))
            .await;

        match result {
            Ok(role) => {
                let detail = if role.created { "created" } else { "reused" };
                let detail = format!("{} {}", detail, role.arn);
                report.record(Stage::Validating, "ensure_role", timer, attempts, Ok(Some(detail)));
                log_stage!(
                    Stage::Validating,
                    config.cluster_name,
                    "Role ready",
                    role = role.name.as_str()
                );
                report.role = Some(role.clone());
                RunState::RoleReady(role)
            }
            Err(err) => {
                report.record(Stage::Validating, "ensure_role", timer, attempts, Err(&err));
                failure(Stage::Validating, &err)
            }
        }
    }

    async fn request_cluster(
        &self,
        ctx: &ProviderContext,
        config: &ProvisioningConfig,
        role: &RoleHandle,
        report: &mut ReportBuilder,
        cancel: &CancelSignal,
    ) -> RunState {
        log_provider_call!("create_cluster", ctx, config.cluster_name);
        let timer = StageTimer::start();
        let (result, attempts) = self
            .settings
            .retry
            .run("create_cluster", cancel, |_| {
                self.clusters.create_cluster(ctx, config, role)
            })
            .await;

        match result {
            Ok(cluster) => {
                let detail = if cluster.adopted {
                    "adopted existing cluster"
                } else {
                    "submitted"
                };
                report.record(
                    Stage::ClusterRequested,
                    "create_cluster",
                    timer,
                    attempts,
                    Ok(Some(detail.to_string())),
                );
                log_stage!(
                    Stage::ClusterRequested,
                    cluster.name,
                    "Cluster requested",
                    state = cluster.state.as_str()
                );
                report.cluster = Some(cluster.clone());
                RunState::ClusterRequested(cluster)
            }
            Err(err) => {
                report.record(
                    Stage::ClusterRequested,
                    "create_cluster",
                    timer,
                    attempts,
                    Err(&err),
                );
                failure(Stage::ClusterRequested, &err)
            }
        }
    }

    async fn await_active(
        &self,
        ctx: &ProviderContext,
        mut cluster: ClusterHandle,
        report: &mut ReportBuilder,
        cancel: &CancelSignal,
    ) -> RunState {
        log_provider_call!("describe_cluster", ctx, cluster.name);
        let timer = StageTimer::start();
        let (result, reads) = self
            .clusters
            .wait_until_active(ctx, &mut cluster, &self.settings.poll, cancel)
            .await;
        report.cluster = Some(cluster.clone());

        match result {
            Ok(()) => {
                let detail = format!("{} after {} reads", cluster.state, reads);
                report.record(Stage::Polling, "wait_until_active", timer, reads, Ok(Some(detail)));
                log_stage!(Stage::Polling, cluster.name, "Cluster active", reads = reads);
                RunState::ClusterActive(cluster)
            }
            Err(err) => {
                report.record(Stage::Polling, "wait_until_active", timer, reads, Err(&err));
                failure(Stage::Polling, &err)
            }
        }
    }

    async fn attach_monitoring(
        &self,
        ctx: &ProviderContext,
        config: &ProvisioningConfig,
        cluster: ClusterHandle,
        report: &mut ReportBuilder,
        cancel: &CancelSignal,
    ) -> RunState {
        let thresholds = self.thresholds_for(config);
        log_provider_call!("put_metric_alarm", ctx, cluster.name);
        let timer = StageTimer::start();
        let (result, attempts) = self
            .settings
            .retry
            .run("attach_monitoring", cancel, |_| {
                self.monitor.attach_monitoring(ctx, &cluster, &thresholds)
            })
            .await;

        match result {
            Ok(alarms) => {
                let detail = alarms.alarm_names.join(", ");
                report.record(
                    Stage::MonitoringAttached,
                    "attach_monitoring",
                    timer,
                    attempts,
                    Ok(Some(detail)),
                );
                log_stage!(
                    Stage::MonitoringAttached,
                    cluster.name,
                    "Monitoring attached",
                    alarms = alarms.alarm_names.len()
                );
                report.alarms = Some(alarms);
                RunState::MonitoringAttached(cluster)
            }
            Err(err) => {
                report.record(
                    Stage::MonitoringAttached,
                    "attach_monitoring",
                    timer,
                    attempts,
                    Err(&err),
                );
                failure(Stage::MonitoringAttached, &err)
            }
        }
    }

    async fn apply_scaling(
        &self,
        ctx: &ProviderContext,
        config: &ProvisioningConfig,
        cluster: &ClusterHandle,
        report: &mut ReportBuilder,
        cancel: &CancelSignal,
    ) -> RunState {
        let group = config.autoscaling_group_name.as_str();
        log_provider_call!("set_desired_capacity", ctx, group);
        let timer = StageTimer::start();
        let (result, attempts) = self
            .settings
            .retry
            .run("scale_to", cancel, |_| {
                self.scaler.scale_to(ctx, group, config.desired_capacity)
            })
            .await;

        match result {
            Ok(scaling) => {
                let detail = format!("{} -> {}", group, scaling.confirmed_capacity);
                report.record(Stage::ScalingApplied, "scale_to", timer, attempts, Ok(Some(detail)));
                log_stage!(
                    Stage::ScalingApplied,
                    cluster.name,
                    "Capacity applied",
                    confirmed = scaling.confirmed_capacity
                );
                report.scaling = Some(scaling);
                RunState::Finished(TerminalStatus::Succeeded, None)
            }
            Err(err) => {
                report.record(Stage::ScalingApplied, "scale_to", timer, attempts, Err(&err));
                failure(Stage::ScalingApplied, &err)
            }
        }
    }

    /// Configured thresholds with per-file overrides applied
    fn thresholds_for(&self, config: &ProvisioningConfig) -> AlarmThresholds {
        let mut thresholds = self.settings.thresholds.clone();
        if let Some(namespace) = &config.metric_namespace {
            thresholds.namespace = namespace.clone();
        }
        if let Some(topic) = &config.alarm_topic_arn {
            thresholds.topic_arn = Some(topic.clone());
        }
        thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;
    use serde_json::json;
    use std::sync::Arc;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_failure_classification() {
        let partial = failure(Stage::MonitoringAttached, &ProvisionError::Monitoring("x".into()));
        assert!(matches!(
            partial,
            RunState::Finished(TerminalStatus::Partial(Stage::MonitoringAttached), Some(_))
        ));

        let cancelled = failure(Stage::ScalingApplied, &ProvisionError::Cancelled);
        assert!(matches!(
            cancelled,
            RunState::Finished(TerminalStatus::Failed(Stage::ScalingApplied), Some(_))
        ));

        let timeout = failure(Stage::Polling, &ProvisionError::Timeout(Duration::from_secs(1)));
        assert!(matches!(
            timeout,
            RunState::Finished(TerminalStatus::Failed(Stage::Polling), Some(_))
        ));
    }

    #[test]
    fn test_thresholds_for_applies_file_overrides() {
        let orchestrator = ProvisioningOrchestrator::new(
            ProviderSet::uniform(Arc::new(SimulatedProvider::new())),
            OrchestratorSettings::default(),
        );
        let config = ConfigValidator::new()
            .validate(&raw(json!({
                "cluster_name": "c1",
                "role_name": "c1-role",
                "subnet_ids": ["subnet-1"],
                "security_group_ids": ["sg-1"],
                "autoscaling_group_name": "asg",
                "desired_capacity": 1,
                "environment": "dev",
                "metric_namespace": "ContainerInsights",
                "alarm_topic_arn": "arn:aws:sns:us-east-1:123456789012:ops"
            })))
            .unwrap();

        let thresholds = orchestrator.thresholds_for(&config);
        assert_eq!(thresholds.namespace, "ContainerInsights");
        assert!(thresholds.topic_arn.is_some());
        assert_eq!(thresholds.period_secs, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_makes_no_provider_calls() {
        let provider = Arc::new(SimulatedProvider::new());
        let orchestrator = ProvisioningOrchestrator::new(
            ProviderSet::uniform(provider.clone()),
            OrchestratorSettings::default(),
        );

        let report = orchestrator
            .run(
                &raw(json!({"cluster_name": "c1"})),
                SecretsSignal::all_present(),
                &CancelSignal::never(),
            )
            .await;

        assert_eq!(report.status, TerminalStatus::Failed(Stage::Validating));
        assert!(!report.violations.is_empty());
        assert!(provider.calls().await.is_empty());
    }
}
