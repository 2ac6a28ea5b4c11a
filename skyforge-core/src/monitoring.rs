//! Cluster health alarms

use crate::cluster::ClusterHandle;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{AlarmApi, ComparisonOperator, MetricAlarm, ProviderContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_NAMESPACE: &str = "AWS/EKS";
pub const HEALTH_METRIC: &str = "ClusterHealth";
pub const NODE_NOT_READY_METRIC: &str = "NodeNotReadyCount";

/// Alarm configuration applied to every monitored metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmThresholds {
    pub namespace: String,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    /// Alarm when control-plane health drops below this
    pub health_threshold: f64,
    /// Alarm when more nodes than this are not ready
    pub node_not_ready_threshold: f64,
    /// Notification topic for alarm actions
    pub topic_arn: Option<String>,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            period_secs: 300,
            evaluation_periods: 1,
            health_threshold: 1.0,
            node_not_ready_threshold: 0.0,
            topic_arn: None,
        }
    }
}

/// Alarm definitions for `cluster_name`, one per monitored metric
pub fn build_alarms(cluster_name: &str, thresholds: &AlarmThresholds) -> Vec<MetricAlarm> {
    let dimensions = BTreeMap::from([("ClusterName".to_string(), cluster_name.to_string())]);
    let actions: Vec<String> = thresholds.topic_arn.iter().cloned().collect();

    let alarm = |suffix: &str, metric: &str, statistic: &str, threshold, comparison| MetricAlarm {
        name: format!("{}_{}", cluster_name, suffix),
        metric_name: metric.to_string(),
        namespace: thresholds.namespace.clone(),
        dimensions: dimensions.clone(),
        statistic: statistic.to_string(),
        period_secs: thresholds.period_secs,
        evaluation_periods: thresholds.evaluation_periods,
        threshold,
        comparison,
        alarm_actions: actions.clone(),
    };

    vec![
        alarm(
            "Health",
            HEALTH_METRIC,
            "Average",
            thresholds.health_threshold,
            ComparisonOperator::LessThanThreshold,
        ),
        alarm(
            "NodeNotReady",
            NODE_NOT_READY_METRIC,
            "Maximum",
            thresholds.node_not_ready_threshold,
            ComparisonOperator::GreaterThanThreshold,
        ),
    ]
}

/// Alarms attached to one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmHandle {
    pub cluster_name: String,
    pub alarm_names: Vec<String>,
    pub thresholds: AlarmThresholds,
}

pub struct HealthMonitorConfigurer {
    alarms: Arc<dyn AlarmApi>,
}

impl HealthMonitorConfigurer {
    pub fn new(alarms: Arc<dyn AlarmApi>) -> Self {
        Self { alarms }
    }

    /// Put every alarm for `cluster`; existing alarms are overwritten
    pub async fn attach_monitoring(
        &self,
        ctx: &ProviderContext,
        cluster: &ClusterHandle,
        thresholds: &AlarmThresholds,
    ) -> ProvisionResult<AlarmHandle> {
        let definitions = build_alarms(&cluster.name, thresholds);
        let mut alarm_names = Vec::with_capacity(definitions.len());

        for alarm in &definitions {
            self.alarms
                .put_metric_alarm(ctx, alarm)
                .await
                .map_err(|e| ProvisionError::from_provider(e, ProvisionError::Monitoring))?;

            info!(
                cluster = %cluster.name,
                alarm = %alarm.name,
                condition = %format!("{} {} {}", alarm.metric_name, alarm.comparison.symbol(), alarm.threshold),
                "Alarm configured"
            );
            alarm_names.push(alarm.name.clone());
        }

        Ok(AlarmHandle {
            cluster_name: cluster.name.clone(),
            alarm_names,
            thresholds: thresholds.clone(),
        })
    }
}
