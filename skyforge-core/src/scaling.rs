//! Worker capacity scaling

use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{ProviderContext, ProviderError, ScalingApi, SetCapacityRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Outcome of one scaling request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingResult {
    pub group_name: String,
    pub requested_capacity: u32,
    pub confirmed_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
}

pub struct CapacityScaler {
    scaling: Arc<dyn ScalingApi>,
}

impl CapacityScaler {
    pub fn new(scaling: Arc<dyn ScalingApi>) -> Self {
        Self { scaling }
    }

    /// Set the desired capacity of `group`
    ///
    /// Targets outside the group's bounds are rejected before any mutation.
    /// Does not wait for instances to launch.
    pub async fn scale_to(
        &self,
        ctx: &ProviderContext,
        group: &str,
        desired: u32,
    ) -> ProvisionResult<ScalingResult> {
        let record = self
            .scaling
            .describe_group(ctx, group)
            .await
            .map_err(|e| Self::map_error(group, e))?
            .ok_or_else(|| ProvisionError::ScalingGroupNotFound(group.to_string()))?;

        if desired > record.max_size || desired < record.min_size {
            return Err(ProvisionError::ScalingRequest(format!(
                "desired capacity {} is outside group '{}' bounds [{}, {}]",
                desired, group, record.min_size, record.max_size
            )));
        }

        let request = SetCapacityRequest {
            group_name: group.to_string(),
            desired_capacity: desired,
            honor_cooldown: true,
        };
        self.scaling
            .set_desired_capacity(ctx, &request)
            .await
            .map_err(|e| Self::map_error(group, e))?;

        let confirmed = self
            .scaling
            .describe_group(ctx, group)
            .await
            .map_err(|e| Self::map_error(group, e))?
            .map(|g| g.desired_capacity)
            .ok_or_else(|| ProvisionError::ScalingGroupNotFound(group.to_string()))?;

        info!(
            group = %group,
            requested = desired,
            confirmed,
            previous = record.desired_capacity,
            "Desired capacity set"
        );

        Ok(ScalingResult {
            group_name: group.to_string(),
            requested_capacity: desired,
            confirmed_capacity: confirmed,
            min_size: record.min_size,
            max_size: record.max_size,
        })
    }

    fn map_error(group: &str, err: ProviderError) -> ProvisionError {
        match err {
            ProviderError::NotFound(_) => ProvisionError::ScalingGroupNotFound(group.to_string()),
            other => ProvisionError::from_provider(other, ProvisionError::ScalingRequest),
        }
    }
}
