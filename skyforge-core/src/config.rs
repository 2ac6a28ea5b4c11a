//! Tool configuration
//!
//! Settings are loaded from, in increasing priority:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. `SKYFORGE_*` environment variables

use crate::cluster::{PollPolicy, DEFAULT_KUBERNETES_VERSION};
use crate::logging::LoggingConfig;
use crate::monitoring::{AlarmThresholds, DEFAULT_NAMESPACE};
use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryPolicy;
use crate::validation::DEFAULT_ENVIRONMENT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct for Skyforge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyforgeConfig {
    /// Provider gateway connection
    pub provider: ProviderConfig,
    /// Backoff for transient provider failures
    pub retry: RetryConfig,
    /// Readiness polling
    pub polling: PollingConfig,
    /// Alarm defaults
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

/// Provider gateway connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Gateway base URL
    pub endpoint: String,
    /// Region used when a provisioning file does not name one
    pub region: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Connection setup timeout
    pub connect_timeout_secs: u64,
    /// Bearer token for the gateway
    pub token: Option<String>,
    /// Kubernetes version used when a provisioning file does not pin one
    pub kubernetes_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// Overall deadline for the cluster to become active
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub namespace: String,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    pub health_threshold: f64,
    pub node_not_ready_threshold: f64,
    /// Default notification topic for alarm actions
    pub topic_arn: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8443".to_string(),
            region: "us-east-1".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            token: None,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            interval_secs: policy.interval.as_secs(),
            deadline_secs: policy.deadline.as_secs(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        let thresholds = AlarmThresholds::default();
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            period_secs: thresholds.period_secs,
            evaluation_periods: thresholds.evaluation_periods,
            health_threshold: thresholds.health_threshold,
            node_not_ready_threshold: thresholds.node_not_ready_threshold,
            topic_arn: None,
        }
    }
}

impl SkyforgeConfig {
    /// Load from the first configuration file found, then apply environment
    /// overrides
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), but `explicit` wins over the search path
    /// and must exist
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("SKYFORGE_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/skyforge/config.toml")),
            Some(PathBuf::from("./skyforge.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `SKYFORGE_*` overrides read through `lookup`
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // Provider
        if let Some(endpoint) = lookup("SKYFORGE_ENDPOINT") {
            self.provider.endpoint = endpoint;
        }
        if let Some(region) = lookup("SKYFORGE_REGION") {
            self.provider.region = region;
        }
        if let Some(token) = lookup("SKYFORGE_TOKEN") {
            self.provider.token = Some(token);
        }
        if let Some(secs) = parsed(lookup("SKYFORGE_REQUEST_TIMEOUT_SECS")) {
            self.provider.request_timeout_secs = secs;
        }
        if let Some(version) = lookup("SKYFORGE_KUBERNETES_VERSION") {
            self.provider.kubernetes_version = version;
        }

        // Retry
        if let Some(attempts) = parsed(lookup("SKYFORGE_RETRY_MAX_ATTEMPTS")) {
            self.retry.max_attempts = attempts;
        }
        if let Some(ms) = parsed(lookup("SKYFORGE_RETRY_INITIAL_DELAY_MS")) {
            self.retry.initial_delay_ms = ms;
        }

        // Polling
        if let Some(secs) = parsed(lookup("SKYFORGE_POLL_INTERVAL_SECS")) {
            self.polling.interval_secs = secs;
        }
        if let Some(secs) = parsed(lookup("SKYFORGE_POLL_DEADLINE_SECS")) {
            self.polling.deadline_secs = secs;
        }

        // Monitoring
        if let Some(topic) = lookup("SKYFORGE_ALARM_TOPIC_ARN") {
            self.monitoring.topic_arn = Some(topic);
        }

        // Logging
        if let Some(level) = lookup("SKYFORGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("SKYFORGE_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SettingsError> {
        let endpoint = &self.provider.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(SettingsError::Validation(format!(
                "provider.endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        if self.provider.region.trim().is_empty() {
            return Err(SettingsError::Validation("provider.region cannot be empty".to_string()));
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(SettingsError::Validation(
                "provider.request_timeout_secs must be positive".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(SettingsError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.multiplier == 0 {
            return Err(SettingsError::Validation(
                "retry.multiplier must be at least 1".to_string(),
            ));
        }

        if self.polling.interval_secs == 0 {
            return Err(SettingsError::Validation(
                "polling.interval_secs must be positive".to_string(),
            ));
        }

        if self.polling.deadline_secs < self.polling.interval_secs {
            return Err(SettingsError::Validation(
                "polling.deadline_secs must not be shorter than polling.interval_secs".to_string(),
            ));
        }

        let period = self.monitoring.period_secs;
        if !(period == 10 || period == 30 || (period > 0 && period % 60 == 0)) {
            return Err(SettingsError::Validation(format!(
                "monitoring.period_secs must be 10, 30 or a multiple of 60, got {}",
                period
            )));
        }

        if self.monitoring.evaluation_periods == 0 {
            return Err(SettingsError::Validation(
                "monitoring.evaluation_periods must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.connect_timeout_secs)
    }

    /// Orchestrator settings derived from this configuration
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                multiplier: self.retry.multiplier,
            },
            poll: PollPolicy {
                interval: Duration::from_secs(self.polling.interval_secs),
                deadline: Duration::from_secs(self.polling.deadline_secs),
            },
            thresholds: AlarmThresholds {
                namespace: self.monitoring.namespace.clone(),
                period_secs: self.monitoring.period_secs,
                evaluation_periods: self.monitoring.evaluation_periods,
                health_threshold: self.monitoring.health_threshold,
                node_not_ready_threshold: self.monitoring.node_not_ready_threshold,
                topic_arn: self.monitoring.topic_arn.clone(),
            },
            default_region: self.provider.region.clone(),
            default_kubernetes_version: self.provider.kubernetes_version.clone(),
            request_timeout: self.request_timeout(),
            default_environment: DEFAULT_ENVIRONMENT,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum SettingsError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            SettingsError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            SettingsError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for SettingsError {}
