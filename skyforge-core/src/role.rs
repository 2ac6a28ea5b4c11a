//! Cluster identity role resolution

use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{CreateRoleRequest, ProviderContext, ProviderError, RoleApi, RoleRecord};
use crate::validation::RoleReference;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Service principal allowed to assume cluster roles
pub const CLUSTER_SERVICE_PRINCIPAL: &str = "eks.amazonaws.com";

/// Managed policy attached to roles created here
pub const CLUSTER_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy";

static ROLE_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:iam::\d{12}:role/([\w+=,.@-]+/)*[\w+=,.@-]+$").unwrap()
});

/// Whether `arn` has the shape of an IAM role ARN
pub fn is_role_arn(arn: &str) -> bool {
    ROLE_ARN_REGEX.is_match(arn)
}

/// Role name used when a configuration asks for one without naming it
pub fn default_role_name(cluster_name: &str) -> String {
    format!("{}-role", cluster_name)
}

/// Trust policy letting the managed Kubernetes service assume the role
pub fn assume_role_policy() -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": CLUSTER_SERVICE_PRINCIPAL },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// A resolved role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
    /// True when this run created the role
    pub created: bool,
}

/// Ensures the cluster's identity role exists
pub struct RoleProvisioner {
    roles: Arc<dyn RoleApi>,
    /// Roles created by a run whose resolution has not finished yet
    pending_created: Mutex<HashSet<(Uuid, String)>>,
}

impl RoleProvisioner {
    pub fn new(roles: Arc<dyn RoleApi>) -> Self {
        Self {
            roles,
            pending_created: Mutex::new(HashSet::new()),
        }
    }

    /// Resolve `reference` to a usable role
    ///
    /// Repeated or concurrent calls with the same name converge on the same
    /// ARN: a create that loses a race re-reads the winner's role. The
    /// cluster policy is attached on every path, so a retry after a failed
    /// attachment completes the role instead of reusing it half-built.
    pub async fn ensure_role(
        &self,
        ctx: &ProviderContext,
        reference: &RoleReference,
    ) -> ProvisionResult<RoleHandle> {
        match reference {
            RoleReference::Arn { arn } => Self::from_arn(arn),
            RoleReference::Create { name } => self.ensure_named(ctx, name).await,
        }
    }

    fn from_arn(arn: &str) -> ProvisionResult<RoleHandle> {
        if !is_role_arn(arn) {
            return Err(ProvisionError::RoleCreation(format!(
                "'{}' is not an IAM role ARN",
                arn
            )));
        }

        let name = arn.rsplit('/').next().unwrap_or(arn).to_string();
        debug!(role = %name, "Using existing role ARN");
        Ok(RoleHandle {
            name,
            arn: arn.to_string(),
            created: false,
        })
    }

    async fn ensure_named(&self, ctx: &ProviderContext, name: &str) -> ProvisionResult<RoleHandle> {
        let record = match self.lookup(ctx, name).await? {
            Some(record) => record,
            None => self.create(ctx, name).await?,
        };

        self.roles
            .attach_role_policy(ctx, &record.name, CLUSTER_POLICY_ARN)
            .await
            .map_err(|e| ProvisionError::from_provider(e, ProvisionError::RoleCreation))?;

        let created = self
            .pending_created
            .lock()
            .await
            .remove(&(ctx.run_id, record.name.clone()));

        if created {
            info!(role = %record.name, arn = %record.arn, "Created cluster role");
        } else {
            info!(role = %record.name, arn = %record.arn, "Reusing existing role");
        }

        Ok(RoleHandle {
            name: record.name,
            arn: record.arn,
            created,
        })
    }

    async fn create(&self, ctx: &ProviderContext, name: &str) -> ProvisionResult<RoleRecord> {
        let request = CreateRoleRequest {
            name: name.to_string(),
            assume_role_policy: assume_role_policy().to_string(),
            description: "Managed Kubernetes cluster service role".to_string(),
        };

        match self.roles.create_role(ctx, &request).await {
            Ok(record) => {
                self.pending_created
                    .lock()
                    .await
                    .insert((ctx.run_id, record.name.clone()));
                Ok(record)
            }
            Err(ProviderError::AlreadyExists(_)) => {
                debug!(role = %name, "Role created concurrently, re-reading");
                self.lookup(ctx, name).await?.ok_or_else(|| {
                    ProvisionError::RoleCreation(format!(
                        "role '{}' reported as existing but could not be read",
                        name
                    ))
                })
            }
            Err(e) => Err(ProvisionError::from_provider(e, ProvisionError::RoleCreation)),
        }
    }

    async fn lookup(&self, ctx: &ProviderContext, name: &str) -> ProvisionResult<Option<RoleRecord>> {
        self.roles
            .get_role(ctx, name)
            .await
            .map_err(|e| ProvisionError::from_provider(e, ProvisionError::RoleCreation))
    }
}
