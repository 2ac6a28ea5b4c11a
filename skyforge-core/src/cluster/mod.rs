//! Managed cluster creation and readiness polling

pub mod poll;
pub mod provisioner;

pub use poll::PollPolicy;
pub use provisioner::{ClusterHandle, ClusterProvisioner, DEFAULT_KUBERNETES_VERSION};
