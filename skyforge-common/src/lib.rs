//! Common types shared between skyforge-core and skyforge-cli

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Deployment environment a configuration file targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Dev,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(Error::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Cluster lifecycle state as reported by the provider
///
/// Serialized as the provider's upper-case status string so that unknown
/// values survive a round trip through the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClusterState {
    Pending,
    Creating,
    Active,
    Updating,
    Deleting,
    Failed,
    Unknown(String),
}

impl ClusterState {
    /// Parse a provider status string (case-insensitive)
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "FAILED" => Self::Failed,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Failed => "FAILED",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// States from which the cluster will never become usable
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Deleting)
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ClusterState {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ClusterState> for String {
    fn from(state: ClusterState) -> Self {
        state.as_str().to_string()
    }
}

/// Provisioning stage in which work is performed
///
/// Role resolution is part of `Validating`: a run cannot leave that stage
/// until both the configuration and the role are known good.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    ClusterRequested,
    Polling,
    MonitoringAttached,
    ScalingApplied,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::ClusterRequested => "cluster_requested",
            Self::Polling => "polling",
            Self::MonitoringAttached => "monitoring_attached",
            Self::ScalingApplied => "scaling_applied",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of the cause that ended a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CauseCategory {
    Config,
    Permission,
    RoleCreation,
    ClusterCreation,
    Transient,
    ClusterReportedFailure,
    Timeout,
    Cancelled,
    Monitoring,
    ScalingRequest,
    ScalingGroupNotFound,
    RunInProgress,
    Provider,
}

impl CauseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Permission => "permission",
            Self::RoleCreation => "role-creation",
            Self::ClusterCreation => "cluster-creation",
            Self::Transient => "transient",
            Self::ClusterReportedFailure => "cluster-reported-failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Monitoring => "monitoring",
            Self::ScalingRequest => "scaling-request",
            Self::ScalingGroupNotFound => "scaling-group-not-found",
            Self::RunInProgress => "run-in-progress",
            Self::Provider => "provider",
        }
    }
}

impl std::fmt::Display for CauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a provisioning run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "stage", rename_all = "snake_case")]
pub enum TerminalStatus {
    Succeeded,
    Failed(Stage),
    Partial(Stage),
}

impl TerminalStatus {
    pub const EXIT_SUCCEEDED: u8 = 0;
    pub const EXIT_FAILED: u8 = 1;
    pub const EXIT_PARTIAL: u8 = 2;

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Succeeded => None,
            Self::Failed(stage) | Self::Partial(stage) => Some(*stage),
        }
    }

    /// Process exit code; partial runs get their own code so operators can
    /// tell "nothing happened" apart from "manual follow-up needed"
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Succeeded => Self::EXIT_SUCCEEDED,
            Self::Failed(_) => Self::EXIT_FAILED,
            Self::Partial(_) => Self::EXIT_PARTIAL,
        }
    }

    /// Severity used to pick the worst outcome across several runs
    pub fn severity(&self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Failed(_) => 1,
            Self::Partial(_) => 2,
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(stage) => write!(f, "failed-at:{}", stage),
            Self::Partial(stage) => write!(f, "partial:{}", stage),
        }
    }
}

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown environment '{0}' (expected dev, staging or production)")]
    UnknownEnvironment(String),
}

pub type Result<T> = std::result::Result<T, Error>;
