//! Cluster creation requests and status reads

use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{ClusterApi, ClusterRecord, CreateClusterRequest, ProviderContext, ProviderError};
use crate::role::RoleHandle;
use crate::validation::ProvisioningConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyforge_common::ClusterState;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_KUBERNETES_VERSION: &str = "1.27";

/// A cluster known to exist on the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterHandle {
    pub name: String,
    pub arn: String,
    pub state: ClusterState,
    pub created_at: DateTime<Utc>,
    /// True when the cluster already existed and this run took it over
    pub adopted: bool,
}

impl ClusterHandle {
    fn from_record(record: ClusterRecord, adopted: bool) -> Self {
        Self {
            name: record.name,
            arn: record.arn,
            state: record.status,
            created_at: record.created_at,
            adopted,
        }
    }
}

/// Submits cluster creation and reads cluster status
pub struct ClusterProvisioner {
    clusters: Arc<dyn ClusterApi>,
    default_version: String,
}

impl ClusterProvisioner {
    pub fn new(clusters: Arc<dyn ClusterApi>) -> Self {
        Self {
            clusters,
            default_version: DEFAULT_KUBERNETES_VERSION.to_string(),
        }
    }

    /// Kubernetes version used when the configuration does not pin one
    pub fn with_default_version(mut self, version: &str) -> Self {
        self.default_version = version.to_string();
        self
    }

    pub fn build_request(&self, config: &ProvisioningConfig, role: &RoleHandle) -> CreateClusterRequest {
        let mut tags = config.tags.clone();
        tags.entry("environment".to_string())
            .or_insert_with(|| config.environment.to_string());
        tags.entry("managed-by".to_string())
            .or_insert_with(|| "skyforge".to_string());

        CreateClusterRequest {
            name: config.cluster_name.clone(),
            version: config
                .kubernetes_version
                .clone()
                .unwrap_or_else(|| self.default_version.clone()),
            role_arn: role.arn.clone(),
            subnet_ids: config.subnet_ids.clone(),
            security_group_ids: config.security_group_ids.clone(),
            tags,
        }
    }

    /// Submit cluster creation; returns before the cluster is ready
    ///
    /// A cluster that already exists under the same name is described and
    /// adopted, so a re-run picks up where a partial run stopped.
    pub async fn create_cluster(
        &self,
        ctx: &ProviderContext,
        config: &ProvisioningConfig,
        role: &RoleHandle,
    ) -> ProvisionResult<ClusterHandle> {
        let request = self.build_request(config, role);

        match self.clusters.create_cluster(ctx, &request).await {
            Ok(record) => {
                info!(
                    cluster = %record.name,
                    arn = %record.arn,
                    version = %request.version,
                    "Cluster creation submitted"
                );
                Ok(ClusterHandle::from_record(record, false))
            }
            Err(ProviderError::AlreadyExists(_)) => {
                let record = self
                    .clusters
                    .describe_cluster(ctx, &request.name)
                    .await
                    .map_err(|e| ProvisionError::from_provider(e, ProvisionError::ClusterCreation))?;
                warn!(
                    cluster = %record.name,
                    state = %record.status,
                    "Cluster already exists, adopting it"
                );
                Ok(ClusterHandle::from_record(record, true))
            }
            Err(e) => Err(ProvisionError::from_provider(e, ProvisionError::ClusterCreation)),
        }
    }

    /// Single status read with no side effects
    pub async fn fetch_status(
        &self,
        ctx: &ProviderContext,
        handle: &ClusterHandle,
    ) -> ProvisionResult<ClusterState> {
        let record = self
            .clusters
            .describe_cluster(ctx, &handle.name)
            .await
            .map_err(|e| match e {
                ProviderError::NotFound(msg) => {
                    ProvisionError::Provider(format!("cluster disappeared: {}", msg))
                }
                other => ProvisionError::from_provider(other, ProvisionError::Provider),
            })?;

        debug!(cluster = %handle.name, state = %record.status, "Fetched cluster status");
        Ok(record.status)
    }

    /// Re-read status into `handle`
    pub async fn refresh(
        &self,
        ctx: &ProviderContext,
        handle: &mut ClusterHandle,
    ) -> ProvisionResult<ClusterState> {
        let state = self.fetch_status(ctx, handle).await?;
        handle.state = state.clone();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockClusterApi, SimulatedProvider};
    use crate::validation::RoleReference;
    use skyforge_common::{CauseCategory, Environment};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn ctx() -> ProviderContext {
        ProviderContext::new("us-east-1", Duration::from_secs(5))
    }

    fn config() -> ProvisioningConfig {
        ProvisioningConfig {
            cluster_name: "dev-cluster".to_string(),
            role: RoleReference::Arn {
                arn: "arn:aws:iam::123456789012:role/dev-cluster-role".to_string(),
            },
            subnet_ids: vec!["s1".to_string(), "s2".to_string()],
            security_group_ids: vec!["sg1".to_string()],
            autoscaling_group_name: "dev-asg".to_string(),
            desired_capacity: 2,
            environment: Environment::Dev,
            region: None,
            kubernetes_version: None,
            alarm_topic_arn: None,
            metric_namespace: None,
            tags: BTreeMap::new(),
        }
    }

    fn role() -> RoleHandle {
        RoleHandle {
            name: "dev-cluster-role".to_string(),
            arn: "arn:aws:iam::123456789012:role/dev-cluster-role".to_string(),
            created: false,
        }
    }

    #[test]
    fn test_request_defaults() {
        let provisioner = ClusterProvisioner::new(Arc::new(SimulatedProvider::new()));
        let request = provisioner.build_request(&config(), &role());

        assert_eq!(request.version, DEFAULT_KUBERNETES_VERSION);
        assert_eq!(request.subnet_ids, vec!["s1", "s2"]);
        assert_eq!(request.tags.get("environment").map(String::as_str), Some("dev"));

        let mut pinned = config();
        pinned.kubernetes_version = Some("1.29".to_string());
        assert_eq!(provisioner.build_request(&pinned, &role()).version, "1.29");
    }

    #[tokio::test]
    async fn test_create_returns_creating_handle() {
        let provisioner = ClusterProvisioner::new(Arc::new(SimulatedProvider::new()));
        let handle = provisioner.create_cluster(&ctx(), &config(), &role()).await.unwrap();

        assert_eq!(handle.name, "dev-cluster");
        assert_eq!(handle.state, ClusterState::Creating);
        assert!(!handle.adopted);
        assert!(handle.arn.ends_with(":cluster/dev-cluster"));
    }

    #[tokio::test]
    async fn test_existing_cluster_is_adopted() {
        let provider = SimulatedProvider::new().with_cluster("dev-cluster", "us-east-1", ClusterState::Active);
        let provisioner = ClusterProvisioner::new(Arc::new(provider));

        let handle = provisioner.create_cluster(&ctx(), &config(), &role()).await.unwrap();
        assert!(handle.adopted);
        assert_eq!(handle.state, ClusterState::Active);
    }

    #[tokio::test]
    async fn test_rejection_is_cluster_creation_error() {
        let mut mock = MockClusterApi::new();
        mock.expect_create_cluster()
            .returning(|_, _| Err(ProviderError::Rejected("quota exceeded".into())));

        let provisioner = ClusterProvisioner::new(Arc::new(mock));
        let err = provisioner
            .create_cluster(&ctx(), &config(), &role())
            .await
            .unwrap_err();
        assert_eq!(err.category(), CauseCategory::ClusterCreation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_throttling_is_retryable() {
        let mut mock = MockClusterApi::new();
        mock.expect_create_cluster()
            .returning(|_, _| Err(ProviderError::Transient("Rate exceeded".into())));

        let provisioner = ClusterProvisioner::new(Arc::new(mock));
        let err = provisioner
            .create_cluster(&ctx(), &config(), &role())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_refresh_updates_handle() {
        let provider = SimulatedProvider::new().with_status_script("dev-cluster", [ClusterState::Updating]);
        let provisioner = ClusterProvisioner::new(Arc::new(provider));
        let mut handle = provisioner.create_cluster(&ctx(), &config(), &role()).await.unwrap();

        let state = provisioner.refresh(&ctx(), &mut handle).await.unwrap();
        assert_eq!(state, ClusterState::Updating);
        assert_eq!(handle.state, ClusterState::Updating);
    }
}
