//! Skyforge core library
//!
//! Provisions a managed Kubernetes cluster: validates the configuration,
//! resolves the identity role, creates the cluster, waits for it to become
//! active, attaches health alarms and scales worker capacity.

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

// Provider access
pub mod provider;

// Provisioning components
pub mod cluster;
pub mod monitoring;
pub mod role;
pub mod scaling;

// Run control
pub mod cancel;
pub mod lock;
pub mod orchestrator;
pub mod report;
pub mod retry;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::SkyforgeConfig;
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::{OrchestratorSettings, ProvisioningOrchestrator};
pub use provider::{HttpProvider, ProviderContext, ProviderSet, SimulatedProvider};
pub use report::ProvisioningReport;
pub use validation::{ConfigValidator, ProvisioningConfig, SecretsSignal};
