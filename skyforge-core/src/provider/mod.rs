//! Cloud provider seams
//!
//! Each provisioning component talks to the provider through its own narrow
//! trait, so tests can script one concern without standing up the others.
//! Production code uses [`http::HttpProvider`]; tests and dry runs use
//! [`simulated::SimulatedProvider`].

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyforge_common::ClusterState;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

pub use http::HttpProvider;
pub use simulated::{Operation, ProviderCall, SimulatedProvider};

/// Provider failure taxonomy shared by every API seam
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transient failure: {0}")]
    Transient(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Per-run context passed into every provider call
///
/// Replaces a process-wide session: it lives exactly as long as one run.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub run_id: Uuid,
    pub region: String,
    pub request_timeout: Duration,
}

impl ProviderContext {
    pub fn new(region: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            region: region.into(),
            request_timeout,
        }
    }
}

// ============================================================================
// Identity roles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    /// JSON trust policy document
    pub assume_role_policy: String,
    pub description: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleApi: Send + Sync {
    /// Look a role up by name; `Ok(None)` when it does not exist
    async fn get_role(&self, ctx: &ProviderContext, name: &str)
        -> ProviderResult<Option<RoleRecord>>;

    async fn create_role(
        &self,
        ctx: &ProviderContext,
        request: &CreateRoleRequest,
    ) -> ProviderResult<RoleRecord>;

    async fn attach_role_policy(
        &self,
        ctx: &ProviderContext,
        role_name: &str,
        policy_arn: &str,
    ) -> ProviderResult<()>;
}

// ============================================================================
// Managed clusters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub name: String,
    pub arn: String,
    pub status: ClusterState,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit cluster creation; returns while the cluster is still creating
    async fn create_cluster(
        &self,
        ctx: &ProviderContext,
        request: &CreateClusterRequest,
    ) -> ProviderResult<ClusterRecord>;

    async fn describe_cluster(&self, ctx: &ProviderContext, name: &str)
        -> ProviderResult<ClusterRecord>;
}

// ============================================================================
// Metric alarms
// ============================================================================

/// Comparison applied between a metric statistic and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanThreshold,
    GreaterThanOrEqualToThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThanThreshold => ">",
            Self::GreaterThanOrEqualToThreshold => ">=",
            Self::LessThanThreshold => "<",
            Self::LessThanOrEqualToThreshold => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlarm {
    pub name: String,
    pub metric_name: String,
    pub namespace: String,
    pub dimensions: BTreeMap<String, String>,
    pub statistic: String,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    pub threshold: f64,
    pub comparison: ComparisonOperator,
    #[serde(default)]
    pub alarm_actions: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlarmApi: Send + Sync {
    /// Create or overwrite the alarm with `alarm.name`
    async fn put_metric_alarm(&self, ctx: &ProviderContext, alarm: &MetricAlarm)
        -> ProviderResult<()>;
}

// ============================================================================
// Autoscaling groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCapacityRequest {
    pub group_name: String,
    pub desired_capacity: u32,
    pub honor_cooldown: bool,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScalingApi: Send + Sync {
    /// Look a group up by name; `Ok(None)` when it does not exist
    async fn describe_group(&self, ctx: &ProviderContext, name: &str)
        -> ProviderResult<Option<GroupRecord>>;

    async fn set_desired_capacity(
        &self,
        ctx: &ProviderContext,
        request: &SetCapacityRequest,
    ) -> ProviderResult<()>;
}

/// The four provider seams a run needs
#[derive(Clone)]
pub struct ProviderSet {
    pub roles: Arc<dyn RoleApi>,
    pub clusters: Arc<dyn ClusterApi>,
    pub alarms: Arc<dyn AlarmApi>,
    pub scaling: Arc<dyn ScalingApi>,
}

impl ProviderSet {
    /// Use one backend for every seam
    pub fn uniform<P>(provider: Arc<P>) -> Self
    where
        P: RoleApi + ClusterApi + AlarmApi + ScalingApi + 'static,
    {
        Self {
            roles: provider.clone(),
            clusters: provider.clone(),
            alarms: provider.clone(),
            scaling: provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_operator_symbols() {
        assert_eq!(ComparisonOperator::LessThanThreshold.symbol(), "<");
        assert_eq!(ComparisonOperator::GreaterThanOrEqualToThreshold.symbol(), ">=");
        assert_eq!(ComparisonOperator::LessThanOrEqualToThreshold.symbol(), "<=");
    }

    #[test]
    fn test_context_gets_fresh_run_id() {
        let a = ProviderContext::new("us-east-1", Duration::from_secs(30));
        let b = ProviderContext::new("us-east-1", Duration::from_secs(30));
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(b.region, "us-east-1");
    }
}
