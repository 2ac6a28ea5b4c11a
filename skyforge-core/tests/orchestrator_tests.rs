//! Orchestrator Tests
//! End-to-end provisioning runs against the scripted in-memory provider

use serde_json::{json, Map, Value};
use skyforge_common::{CauseCategory, ClusterState, Environment, Stage, TerminalStatus};
use skyforge_core::cluster::PollPolicy;
use skyforge_core::provider::{Operation, ProviderError, ProviderSet, SimulatedProvider};
use skyforge_core::report::StageOutcome;
use skyforge_core::retry::RetryPolicy;
use skyforge_core::role::CLUSTER_POLICY_ARN;
use skyforge_core::{
    CancelHandle, CancelSignal, OrchestratorSettings, ProvisioningOrchestrator, ProvisioningReport,
    SecretsSignal,
};
use std::sync::Arc;
use std::time::Duration;

const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/dev-cluster-role";

// ============== Helpers ==============

fn dev_config() -> Map<String, Value> {
    json!({
        "cluster_name": "dev-cluster",
        "role_arn": ROLE_ARN,
        "subnet_ids": ["s1", "s2"],
        "security_group_ids": ["sg1"],
        "autoscaling_group_name": "dev-asg",
        "desired_capacity": 2,
        "environment": "dev"
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2,
        },
        poll: PollPolicy {
            interval: Duration::from_secs(10),
            deadline: Duration::from_secs(120),
        },
        ..OrchestratorSettings::default()
    }
}

fn provider() -> SimulatedProvider {
    SimulatedProvider::new().with_group("dev-asg", 1, 5, 1)
}

fn orchestrator(provider: &Arc<SimulatedProvider>) -> ProvisioningOrchestrator {
    ProvisioningOrchestrator::new(ProviderSet::uniform(provider.clone()), settings())
}

async fn run(provider: &Arc<SimulatedProvider>, config: &Map<String, Value>) -> ProvisioningReport {
    orchestrator(provider)
        .run(config, SecretsSignal::all_present(), &CancelSignal::never())
        .await
}

// ============== Happy Path ==============

#[tokio::test(start_paused = true)]
async fn test_dev_config_succeeds_with_requested_capacity() {
    let provider = Arc::new(provider());
    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert!(report.cause.is_none());
    assert_eq!(report.environment, Some(Environment::Dev));

    let scaling = report.scaling.as_ref().unwrap();
    assert_eq!(scaling.confirmed_capacity, 2);
    assert_eq!(scaling.requested_capacity, 2);

    let stages: Vec<Stage> = report.stages.iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Validating,
            Stage::Validating,
            Stage::ClusterRequested,
            Stage::Polling,
            Stage::MonitoringAttached,
            Stage::ScalingApplied,
        ]
    );
    assert!(report.stages.iter().all(|r| r.outcome == StageOutcome::Succeeded));

    assert_eq!(report.cluster.as_ref().unwrap().state, ClusterState::Active);
    assert_eq!(report.alarms.as_ref().unwrap().alarm_names.len(), 2);
    assert!(!report.role.as_ref().unwrap().created);
}

#[tokio::test(start_paused = true)]
async fn test_role_is_created_when_named() {
    let provider = Arc::new(provider());
    let mut config = dev_config();
    config.remove("role_arn");
    config.insert("role_name".into(), json!("dev-cluster-role"));

    let report = run(&provider, &config).await;
    assert_eq!(report.status, TerminalStatus::Succeeded);

    let role = report.role.as_ref().unwrap();
    assert!(role.created);
    assert_eq!(role.arn, ROLE_ARN);
    assert_eq!(provider.call_count(Operation::CreateRole).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_secrets_are_warnings_only() {
    let provider = Arc::new(provider());
    let report = orchestrator(&provider)
        .run(&dev_config(), SecretsSignal::default(), &CancelSignal::never())
        .await;

    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.warnings.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_role_finished_after_transient_policy_failure() {
    let provider = Arc::new(provider().with_failure(
        Operation::AttachRolePolicy,
        ProviderError::Transient("throttled".into()),
    ));
    let mut config = dev_config();
    config.remove("role_arn");
    config.insert("role_name".into(), json!("dev-cluster-role"));

    let report = run(&provider, &config).await;
    assert_eq!(report.status, TerminalStatus::Succeeded);

    let role = report.role.as_ref().unwrap();
    assert!(role.created);
    assert_eq!(
        provider.attached_policies("dev-cluster-role").await,
        vec![CLUSTER_POLICY_ARN.to_string()]
    );
    assert_eq!(provider.call_count(Operation::CreateRole).await, 1);

    let ensure = report
        .stages
        .iter()
        .find(|r| r.operation == "ensure_role")
        .unwrap();
    assert_eq!(ensure.attempts, 2);
    assert_eq!(ensure.outcome, StageOutcome::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_role_defaults_to_cluster_name() {
    let provider = Arc::new(provider());
    let mut config = dev_config();
    config.remove("role_arn");

    let report = run(&provider, &config).await;
    assert_eq!(report.status, TerminalStatus::Succeeded);

    let role = report.role.as_ref().unwrap();
    assert_eq!(role.name, "dev-cluster-role");
    assert_eq!(role.arn, ROLE_ARN);
    assert!(role.created);
}

#[tokio::test(start_paused = true)]
async fn test_config_without_environment_defaults_to_dev() {
    let provider = Arc::new(provider());
    let config = json!({
        "cluster_name": "dev-cluster",
        "role_arn": ROLE_ARN,
        "subnet_ids": ["s1", "s2"],
        "security_group_ids": ["sg1"],
        "autoscaling_group_name": "dev-asg",
        "desired_capacity": 2
    });

    let report = run(&provider, config.as_object().unwrap()).await;
    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.environment, Some(Environment::Dev));
    assert_eq!(report.scaling.as_ref().unwrap().confirmed_capacity, 2);
}

#[tokio::test(start_paused = true)]
async fn test_prevalidated_config_runs_the_same_stages() {
    let provider = Arc::new(provider());
    let orchestrator = orchestrator(&provider);
    let config = orchestrator.validate(&dev_config()).unwrap();

    let report = orchestrator
        .run_config(&config, SecretsSignal::default(), &CancelSignal::never())
        .await;

    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.warnings.len(), 2);
    assert_eq!(report.stages[0].operation, "validate_config");
    assert_eq!(report.stages.len(), 6);
}

// ============== Validation ==============

#[tokio::test(start_paused = true)]
async fn test_missing_keys_are_all_reported_before_any_provider_call() {
    let provider = Arc::new(provider());
    let mut config = dev_config();
    config.remove("subnet_ids");
    config.remove("desired_capacity");
    config.remove("autoscaling_group_name");

    let report = run(&provider, &config).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Validating));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Config);

    let keys: Vec<&str> = report.violations.iter().map(|v| v.key.as_str()).collect();
    assert_eq!(keys, vec!["subnet_ids", "autoscaling_group_name", "desired_capacity"]);
    assert!(provider.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_aborts_before_mutation() {
    let provider = Arc::new(provider().with_failure(
        Operation::GetRole,
        ProviderError::AccessDenied("iam:GetRole".into()),
    ));
    let mut config = dev_config();
    config.remove("role_arn");
    config.insert("role_name".into(), json!("dev-cluster-role"));

    let report = run(&provider, &config).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Validating));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Permission);
    assert_eq!(provider.call_count(Operation::CreateCluster).await, 0);
}

// ============== Cluster Creation ==============

#[tokio::test(start_paused = true)]
async fn test_transient_create_failures_are_retried() {
    let provider = Arc::new(
        provider()
            .with_failure(Operation::CreateCluster, ProviderError::Transient("Throttling".into()))
            .with_failure(Operation::CreateCluster, ProviderError::Transient("Throttling".into())),
    );

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.stage(Stage::ClusterRequested).unwrap().attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_gives_up_at_attempt_ceiling() {
    let mut provider = provider();
    for _ in 0..3 {
        provider = provider.with_failure(
            Operation::CreateCluster,
            ProviderError::Transient("ServiceUnavailable".into()),
        );
    }
    let provider = Arc::new(provider);

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::ClusterRequested));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Transient);
    assert_eq!(provider.call_count(Operation::CreateCluster).await, 3);
    assert!(report.cluster.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_create_is_not_retried() {
    let provider = Arc::new(provider().with_failure(
        Operation::CreateCluster,
        ProviderError::Rejected("ResourceLimitExceeded".into()),
    ));

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::ClusterRequested));
    assert_eq!(
        report.cause.as_ref().unwrap().category,
        CauseCategory::ClusterCreation
    );
    assert_eq!(provider.call_count(Operation::CreateCluster).await, 1);
}

// ============== Polling ==============

#[tokio::test(start_paused = true)]
async fn test_poll_ends_at_third_read_when_active() {
    let provider = Arc::new(provider().with_status_script(
        "dev-cluster",
        [ClusterState::Creating, ClusterState::Creating, ClusterState::Active],
    ));

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Succeeded);
    assert_eq!(report.stage(Stage::Polling).unwrap().attempts, 3);
    assert_eq!(provider.call_count(Operation::DescribeCluster).await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cluster_ends_run_at_polling() {
    let provider = Arc::new(provider().with_status_script(
        "dev-cluster",
        [ClusterState::Creating, ClusterState::Failed],
    ));

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Polling));
    assert_eq!(
        report.cause.as_ref().unwrap().category,
        CauseCategory::ClusterReportedFailure
    );
    assert_eq!(report.stage(Stage::Polling).unwrap().attempts, 2);
    assert_eq!(provider.call_count(Operation::PutMetricAlarm).await, 0);
    assert_eq!(provider.call_count(Operation::SetDesiredCapacity).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_deadline_leaves_cluster_in_place() {
    let provider = Arc::new(provider().with_status_script("dev-cluster", [ClusterState::Creating]));

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Polling));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Timeout);
    assert_eq!(
        provider.cluster("dev-cluster").await.unwrap().status,
        ClusterState::Creating
    );
    assert_eq!(report.cluster.as_ref().unwrap().state, ClusterState::Creating);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_polling() {
    let provider = Arc::new(provider().with_status_script("dev-cluster", [ClusterState::Creating]));
    let orchestrator = orchestrator(&provider);
    let cancel = CancelHandle::new();
    let signal = cancel.signal();
    let config = dev_config();

    let (report, _) = tokio::join!(
        orchestrator.run(&config, SecretsSignal::all_present(), &signal),
        async {
            tokio::time::sleep(Duration::from_secs(25)).await;
            cancel.cancel();
        }
    );

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Polling));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Cancelled);
    assert_eq!(provider.call_count(Operation::DescribeGroup).await, 0);
    assert_eq!(provider.call_count(Operation::SetDesiredCapacity).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_stage_is_recorded() {
    let provider = Arc::new(provider());
    let cancel = CancelHandle::new();
    cancel.cancel();

    let report = orchestrator(&provider)
        .run(&dev_config(), SecretsSignal::all_present(), &cancel.signal())
        .await;

    assert_eq!(report.status, TerminalStatus::Failed(Stage::Validating));
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Cancelled);

    let last = report.stages.last().unwrap();
    assert_eq!(last.stage, Stage::Validating);
    assert_eq!(last.operation, "cancelled");
    assert_eq!(last.outcome, StageOutcome::Failed);
    assert_eq!(last.attempts, 0);
    assert_eq!(last.duration_ms, 0);
    assert!(provider.calls().await.is_empty());
}

// ============== Partial Provisioning ==============

#[tokio::test(start_paused = true)]
async fn test_monitoring_failure_is_partial() {
    let provider = Arc::new(provider().with_failure(
        Operation::PutMetricAlarm,
        ProviderError::Rejected("InvalidParameterValue".into()),
    ));

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Partial(Stage::MonitoringAttached));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.cause.as_ref().unwrap().category, CauseCategory::Monitoring);
    assert!(report.stage_succeeded(Stage::ClusterRequested));
    assert!(report.stage_succeeded(Stage::Polling));
    assert!(!report.reached(Stage::ScalingApplied));
}

#[tokio::test(start_paused = true)]
async fn test_scaling_above_max_is_partial_without_mutation() {
    let provider = Arc::new(provider());
    let mut config = dev_config();
    config.insert("desired_capacity".into(), json!(6));

    let report = run(&provider, &config).await;

    assert_eq!(report.status, TerminalStatus::Partial(Stage::ScalingApplied));
    assert_eq!(
        report.cause.as_ref().unwrap().category,
        CauseCategory::ScalingRequest
    );
    assert!(!report.stage_succeeded(Stage::ScalingApplied));
    assert!(report.scaling.is_none());
    assert_eq!(provider.call_count(Operation::SetDesiredCapacity).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_partial_adopts_cluster() {
    let provider = Arc::new(provider().with_failure(
        Operation::PutMetricAlarm,
        ProviderError::Rejected("InvalidParameterValue".into()),
    ));

    let first = run(&provider, &dev_config()).await;
    assert_eq!(first.status, TerminalStatus::Partial(Stage::MonitoringAttached));

    let second = run(&provider, &dev_config()).await;
    assert_eq!(second.status, TerminalStatus::Succeeded);
    assert!(second.cluster.as_ref().unwrap().adopted);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_scaling_group_is_partial() {
    let provider = Arc::new(SimulatedProvider::new());

    let report = run(&provider, &dev_config()).await;

    assert_eq!(report.status, TerminalStatus::Partial(Stage::ScalingApplied));
    assert_eq!(
        report.cause.as_ref().unwrap().category,
        CauseCategory::ScalingGroupNotFound
    );
}

// ============== Concurrent Runs ==============

#[tokio::test(start_paused = true)]
async fn test_independent_clusters_run_concurrently() {
    let provider = Arc::new(provider().with_group("staging-asg", 1, 5, 1));
    let mut staging = dev_config();
    staging.insert("cluster_name".into(), json!("staging-cluster"));
    staging.insert("autoscaling_group_name".into(), json!("staging-asg"));
    staging.insert("environment".into(), json!("staging"));

    let reports = orchestrator(&provider)
        .provision_all(
            &[dev_config(), staging],
            SecretsSignal::all_present(),
            &CancelSignal::never(),
        )
        .await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status.is_success()));
    assert_eq!(reports[1].environment, Some(Environment::Staging));
}

#[tokio::test(start_paused = true)]
async fn test_same_cluster_runs_do_not_overlap() {
    let provider = Arc::new(provider().with_status_script(
        "dev-cluster",
        [ClusterState::Creating, ClusterState::Active],
    ));

    let reports = orchestrator(&provider)
        .provision_all(
            &[dev_config(), dev_config()],
            SecretsSignal::all_present(),
            &CancelSignal::never(),
        )
        .await;

    assert_eq!(reports[0].status, TerminalStatus::Succeeded);
    assert_eq!(reports[1].status, TerminalStatus::Failed(Stage::Validating));
    assert_eq!(
        reports[1].cause.as_ref().unwrap().category,
        CauseCategory::RunInProgress
    );
    assert_eq!(provider.call_count(Operation::CreateCluster).await, 1);
}

// ============== Report ==============

#[tokio::test(start_paused = true)]
async fn test_report_serializes_terminal_status() {
    let provider = Arc::new(provider().with_failure(
        Operation::PutMetricAlarm,
        ProviderError::Rejected("InvalidParameterValue".into()),
    ));

    let report = run(&provider, &dev_config()).await;
    let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(json["status"], "partial:monitoring_attached");
    assert_eq!(json["cause"]["category"], "monitoring");
    assert_eq!(json["cluster"]["state"], "ACTIVE");
    assert!(report.log_lines()[0].contains("status=partial:monitoring_attached"));
}
