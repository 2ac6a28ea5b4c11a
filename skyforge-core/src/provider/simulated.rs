//! In-memory provider
//!
//! Backs dry runs and tests. Cluster status reads follow a per-cluster script
//! when one is set; otherwise a creating cluster turns active on its first
//! status read. Failures can be queued per operation and are consumed in
//! order, one per call.

use super::{
    AlarmApi, ClusterApi, ClusterRecord, CreateClusterRequest, CreateRoleRequest, GroupRecord,
    MetricAlarm, ProviderContext, ProviderError, ProviderResult, RoleApi, RoleRecord, ScalingApi,
    SetCapacityRequest,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use skyforge_common::ClusterState;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Provider operation, used for call logs and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetRole,
    CreateRole,
    AttachRolePolicy,
    CreateCluster,
    DescribeCluster,
    PutMetricAlarm,
    DescribeGroup,
    SetDesiredCapacity,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCall {
    pub operation: Operation,
    pub target: String,
}

#[derive(Default)]
struct State {
    account_id: String,
    roles: HashMap<String, RoleRecord>,
    attached_policies: HashMap<String, Vec<String>>,
    clusters: HashMap<String, ClusterRecord>,
    status_scripts: HashMap<String, VecDeque<ClusterState>>,
    alarms: BTreeMap<String, MetricAlarm>,
    groups: HashMap<String, GroupRecord>,
    /// When set, unknown groups are synthesized with this max size
    auto_group_max: Option<u32>,
    failures: HashMap<Operation, VecDeque<ProviderError>>,
    calls: Vec<ProviderCall>,
}

impl State {
    /// Log the call and hand back a queued failure, if any
    fn enter(&mut self, operation: Operation, target: &str) -> ProviderResult<()> {
        self.calls.push(ProviderCall {
            operation,
            target: target.to_string(),
        });

        match self.failures.get_mut(&operation).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, name)
    }

    fn cluster_arn(&self, region: &str, name: &str) -> String {
        format!("arn:aws:eks:{}:{}:cluster/{}", region, self.account_id, name)
    }
}

/// Scriptable in-memory provider
pub struct SimulatedProvider {
    state: Mutex<State>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                account_id: DEFAULT_ACCOUNT_ID.to_string(),
                ..Default::default()
            }),
        }
    }

    /// Provider for `--dry-run`: every autoscaling group exists with the
    /// given upper bound
    pub fn for_dry_run(group_max: u32) -> Self {
        let mut provider = Self::new();
        provider.state.get_mut().auto_group_max = Some(group_max);
        provider
    }

    /// Seed an existing role
    pub fn with_role(mut self, name: &str) -> Self {
        let state = self.state.get_mut();
        let arn = state.role_arn(name);
        state.roles.insert(
            name.to_string(),
            RoleRecord {
                name: name.to_string(),
                arn,
            },
        );
        self
    }

    /// Seed an autoscaling group
    pub fn with_group(mut self, name: &str, min_size: u32, max_size: u32, desired: u32) -> Self {
        self.state.get_mut().groups.insert(
            name.to_string(),
            GroupRecord {
                name: name.to_string(),
                min_size,
                max_size,
                desired_capacity: desired,
            },
        );
        self
    }

    /// Seed a cluster that already exists in `status`
    pub fn with_cluster(mut self, name: &str, region: &str, status: ClusterState) -> Self {
        let state = self.state.get_mut();
        let arn = state.cluster_arn(region, name);
        state.clusters.insert(
            name.to_string(),
            ClusterRecord {
                name: name.to_string(),
                arn,
                status,
                created_at: Utc::now(),
            },
        );
        self
    }

    /// Script the statuses returned by successive status reads
    ///
    /// The last scripted status sticks once the script runs out.
    pub fn with_status_script<I>(mut self, cluster: &str, statuses: I) -> Self
    where
        I: IntoIterator<Item = ClusterState>,
    {
        self.state
            .get_mut()
            .status_scripts
            .insert(cluster.to_string(), statuses.into_iter().collect());
        self
    }

    /// Queue a failure for the next call of `operation`
    pub fn with_failure(mut self, operation: Operation, err: ProviderError) -> Self {
        self.state
            .get_mut()
            .failures
            .entry(operation)
            .or_default()
            .push_back(err);
        self
    }

    /// All calls in order
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls made to `operation`
    pub async fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub async fn alarms(&self) -> Vec<MetricAlarm> {
        self.state.lock().await.alarms.values().cloned().collect()
    }

    pub async fn group(&self, name: &str) -> Option<GroupRecord> {
        self.state.lock().await.groups.get(name).cloned()
    }

    pub async fn cluster(&self, name: &str) -> Option<ClusterRecord> {
        self.state.lock().await.clusters.get(name).cloned()
    }

    pub async fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .attached_policies
            .get(role_name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleApi for SimulatedProvider {
    async fn get_role(&self, _ctx: &ProviderContext, name: &str) -> ProviderResult<Option<RoleRecord>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::GetRole, name)?;
        Ok(state.roles.get(name).cloned())
    }

    async fn create_role(
        &self,
        _ctx: &ProviderContext,
        request: &CreateRoleRequest,
    ) -> ProviderResult<RoleRecord> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateRole, &request.name)?;

        if state.roles.contains_key(&request.name) {
            return Err(ProviderError::AlreadyExists(format!(
                "Role with name {} already exists",
                request.name
            )));
        }

        let record = RoleRecord {
            name: request.name.clone(),
            arn: state.role_arn(&request.name),
        };
        state.roles.insert(request.name.clone(), record.clone());
        Ok(record)
    }

    async fn attach_role_policy(
        &self,
        _ctx: &ProviderContext,
        role_name: &str,
        policy_arn: &str,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::AttachRolePolicy, role_name)?;

        if !state.roles.contains_key(role_name) {
            return Err(ProviderError::NotFound(format!("Role {} not found", role_name)));
        }

        let policies = state
            .attached_policies
            .entry(role_name.to_string())
            .or_default();
        if !policies.iter().any(|p| p == policy_arn) {
            policies.push(policy_arn.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for SimulatedProvider {
    async fn create_cluster(
        &self,
        ctx: &ProviderContext,
        request: &CreateClusterRequest,
    ) -> ProviderResult<ClusterRecord> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateCluster, &request.name)?;

        if state.clusters.contains_key(&request.name) {
            return Err(ProviderError::AlreadyExists(format!(
                "Cluster already exists with name: {}",
                request.name
            )));
        }

        let record = ClusterRecord {
            name: request.name.clone(),
            arn: state.cluster_arn(&ctx.region, &request.name),
            status: ClusterState::Creating,
            created_at: Utc::now(),
        };
        state.clusters.insert(request.name.clone(), record.clone());
        Ok(record)
    }

    async fn describe_cluster(&self, _ctx: &ProviderContext, name: &str) -> ProviderResult<ClusterRecord> {
        let mut state = self.state.lock().await;
        state.enter(Operation::DescribeCluster, name)?;

        let next = match state.status_scripts.get_mut(name) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };

        let record = state
            .clusters
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(format!("No cluster found for name: {}", name)))?;

        match next {
            Some(status) => record.status = status,
            None if record.status == ClusterState::Creating => record.status = ClusterState::Active,
            None => {}
        }

        Ok(record.clone())
    }
}

#[async_trait]
impl AlarmApi for SimulatedProvider {
    async fn put_metric_alarm(&self, _ctx: &ProviderContext, alarm: &MetricAlarm) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::PutMetricAlarm, &alarm.name)?;
        state.alarms.insert(alarm.name.clone(), alarm.clone());
        Ok(())
    }
}

#[async_trait]
impl ScalingApi for SimulatedProvider {
    async fn describe_group(&self, _ctx: &ProviderContext, name: &str) -> ProviderResult<Option<GroupRecord>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::DescribeGroup, name)?;

        if let Some(group) = state.groups.get(name) {
            return Ok(Some(group.clone()));
        }

        match state.auto_group_max {
            Some(max_size) => {
                let group = GroupRecord {
                    name: name.to_string(),
                    min_size: 0,
                    max_size,
                    desired_capacity: 0,
                };
                state.groups.insert(name.to_string(), group.clone());
                Ok(Some(group))
            }
            None => Ok(None),
        }
    }

    async fn set_desired_capacity(
        &self,
        _ctx: &ProviderContext,
        request: &SetCapacityRequest,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::SetDesiredCapacity, &request.group_name)?;

        let group = state.groups.get_mut(&request.group_name).ok_or_else(|| {
            ProviderError::NotFound(format!("AutoScalingGroup name not found: {}", request.group_name))
        })?;

        if request.desired_capacity > group.max_size || request.desired_capacity < group.min_size {
            return Err(ProviderError::Rejected(format!(
                "New SetDesiredCapacity value {} is outside of [{}, {}]",
                request.desired_capacity, group.min_size, group.max_size
            )));
        }

        group.desired_capacity = request.desired_capacity;
        Ok(())
    }
}
