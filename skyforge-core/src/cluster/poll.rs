//! Readiness polling

use super::{ClusterHandle, ClusterProvisioner};
use crate::cancel::CancelSignal;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::ProviderContext;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fixed-interval poll bounded by an overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

impl ClusterProvisioner {
    /// Poll until the cluster is active
    ///
    /// Ends with `ClusterReportedFailure` on FAILED or DELETING and with
    /// `Timeout` once another read would land past the deadline. Transient
    /// read errors are logged and polling continues. Returns the outcome and
    /// the number of status reads made; the cluster is never touched.
    pub async fn wait_until_active(
        &self,
        ctx: &ProviderContext,
        handle: &mut ClusterHandle,
        policy: &PollPolicy,
        cancel: &CancelSignal,
    ) -> (ProvisionResult<()>, u32) {
        let deadline = Instant::now() + policy.deadline;
        let mut reads = 0;

        loop {
            if let Err(e) = cancel.check() {
                return (Err(e), reads);
            }

            reads += 1;
            match self.refresh(ctx, handle).await {
                Ok(state) if state.is_active() => {
                    info!(cluster = %handle.name, reads, "Cluster is active");
                    return (Ok(()), reads);
                }
                Ok(state) if state.is_terminal_failure() => {
                    return (Err(ProvisionError::ClusterReportedFailure(state)), reads);
                }
                Ok(state) => {
                    debug!(cluster = %handle.name, state = %state, reads, "Cluster not active yet");
                }
                Err(e) if e.is_retryable() => {
                    warn!(cluster = %handle.name, error = %e, reads, "Status read failed, will retry");
                }
                Err(e) => return (Err(e), reads),
            }

            if Instant::now() + policy.interval > deadline {
                return (Err(ProvisionError::Timeout(policy.deadline)), reads);
            }

            if let Err(e) = cancel.sleep(policy.interval).await {
                return (Err(e), reads);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::provider::{Operation, ProviderError, SimulatedProvider};
    use skyforge_common::ClusterState;
    use std::sync::Arc;

    fn ctx() -> ProviderContext {
        ProviderContext::new("us-east-1", Duration::from_secs(5))
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(10),
            deadline: Duration::from_secs(60),
        }
    }

    fn handle() -> ClusterHandle {
        ClusterHandle {
            name: "c1".to_string(),
            arn: "arn:aws:eks:us-east-1:123456789012:cluster/c1".to_string(),
            state: ClusterState::Creating,
            created_at: chrono::Utc::now(),
            adopted: false,
        }
    }

    fn provisioner(provider: SimulatedProvider) -> ClusterProvisioner {
        ClusterProvisioner::new(Arc::new(
            provider.with_cluster("c1", "us-east-1", ClusterState::Creating),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ends_at_first_active_read() {
        let provisioner = provisioner(SimulatedProvider::new().with_status_script(
            "c1",
            [ClusterState::Creating, ClusterState::Creating, ClusterState::Active],
        ));
        let mut handle = handle();

        let (result, reads) = provisioner
            .wait_until_active(&ctx(), &mut handle, &policy(), &CancelSignal::never())
            .await;
        assert!(result.is_ok());
        assert_eq!(reads, 3);
        assert_eq!(handle.state, ClusterState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_ends_polling() {
        let provisioner = provisioner(
            SimulatedProvider::new()
                .with_status_script("c1", [ClusterState::Creating, ClusterState::Failed]),
        );
        let mut handle = handle();

        let (result, reads) = provisioner
            .wait_until_active(&ctx(), &mut handle, &policy(), &CancelSignal::never())
            .await;
        assert!(matches!(
            result,
            Err(ProvisionError::ClusterReportedFailure(ClusterState::Failed))
        ));
        assert_eq!(reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_enforced() {
        let provisioner = provisioner(
            SimulatedProvider::new().with_status_script("c1", [ClusterState::Creating]),
        );
        let mut handle = handle();
        let started = Instant::now();

        let (result, reads) = provisioner
            .wait_until_active(&ctx(), &mut handle, &policy(), &CancelSignal::never())
            .await;
        assert!(matches!(result, Err(ProvisionError::Timeout(_))));
        assert_eq!(reads, 7);
        assert!(started.elapsed() <= policy().deadline);
        assert_eq!(handle.state, ClusterState::Creating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_errors_are_tolerated() {
        let provisioner = provisioner(
            SimulatedProvider::new()
                .with_status_script("c1", [ClusterState::Active])
                .with_failure(
                    Operation::DescribeCluster,
                    ProviderError::Transient("connection reset".into()),
                ),
        );
        let mut handle = handle();

        let (result, reads) = provisioner
            .wait_until_active(&ctx(), &mut handle, &policy(), &CancelSignal::never())
            .await;
        assert!(result.is_ok());
        assert_eq!(reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let provisioner = provisioner(
            SimulatedProvider::new().with_status_script("c1", [ClusterState::Creating]),
        );
        let mut handle = handle();
        let cancel = CancelHandle::new();
        let signal = cancel.signal();
        let ctx = ctx();
        let policy = policy();

        let ((result, reads), _) = tokio::join!(
            provisioner.wait_until_active(&ctx, &mut handle, &policy, &signal),
            async {
                tokio::time::sleep(Duration::from_secs(15)).await;
                cancel.cancel();
            }
        );
        assert!(matches!(result, Err(ProvisionError::Cancelled)));
        assert_eq!(reads, 2);
    }
}
