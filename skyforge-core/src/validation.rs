//! Provisioning configuration validation
//!
//! Checks a raw key/value mapping against the required-key schema and
//! collects every violation in one pass, so an operator can fix a file in a
//! single edit instead of one error at a time.

use crate::role::{default_role_name, is_role_arn};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use skyforge_common::Environment;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use thiserror::Error;

/// Provider limit on cluster name length
pub const MAX_CLUSTER_NAME_LENGTH: usize = 100;

/// Keys every configuration must carry
pub const REQUIRED_KEYS: [&str; 5] = [
    "cluster_name",
    "subnet_ids",
    "security_group_ids",
    "autoscaling_group_name",
    "desired_capacity",
];

/// Environment assumed when a mapping carries no `environment` label
pub const DEFAULT_ENVIRONMENT: Environment = Environment::Dev;

static CLUSTER_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z][A-Za-z0-9_-]*$").unwrap()
});

static REGION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").unwrap()
});

static K8S_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+$").unwrap()
});

static TOPIC_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[a-z-]+:sns:[a-z0-9-]+:\d{12}:[A-Za-z0-9_-]+$").unwrap()
});

/// Kind of a single configuration violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    WrongType,
    Empty,
    Malformed,
    Duplicate,
    Conflict,
    UnknownEnvironment,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::WrongType => "wrong_type",
            Self::Empty => "empty",
            Self::Malformed => "malformed",
            Self::Duplicate => "duplicate",
            Self::Conflict => "conflict",
            Self::UnknownEnvironment => "unknown_environment",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found in a configuration mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub key: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    fn new(key: &str, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Configuration rejected by the validator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{} configuration violation(s): {}", .0.len(), summarize(.0))]
    Invalid(Vec<Violation>),
}

impl ConfigError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Invalid(violations) => violations,
        }
    }

    /// Keys named by at least one violation, in report order
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.violations()
            .iter()
            .map(|v| v.key.as_str())
            .filter(|k| seen.insert(*k))
            .collect()
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// How the cluster's identity role is obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleReference {
    /// Reuse an existing role by ARN
    Arn { arn: String },
    /// Look up or create a role with this logical name
    Create { name: String },
}

impl RoleReference {
    pub fn describe(&self) -> &str {
        match self {
            Self::Arn { arn } => arn,
            Self::Create { name } => name,
        }
    }
}

/// Validated provisioning configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningConfig {
    pub cluster_name: String,
    pub role: RoleReference,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub autoscaling_group_name: String,
    pub desired_capacity: u32,
    pub environment: Environment,
    pub region: Option<String>,
    pub kubernetes_version: Option<String>,
    pub alarm_topic_arn: Option<String>,
    pub metric_namespace: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Presence of the secrets the surrounding tooling expects
///
/// Only booleans reach the core; secret values never leave the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecretsSignal {
    pub api_key_present: bool,
    pub db_password_present: bool,
}

impl SecretsSignal {
    pub const API_KEY_VAR: &'static str = "API_KEY";
    pub const DB_PASSWORD_VAR: &'static str = "DB_PASSWORD";

    pub fn from_env() -> Self {
        let present = |var: &str| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
        Self {
            api_key_present: present(Self::API_KEY_VAR),
            db_password_present: present(Self::DB_PASSWORD_VAR),
        }
    }

    pub fn all_present() -> Self {
        Self {
            api_key_present: true,
            db_password_present: true,
        }
    }
}

/// Batch validator for raw configuration mappings
#[derive(Debug, Clone, Copy)]
pub struct ConfigValidator {
    default_environment: Environment,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self {
            default_environment: DEFAULT_ENVIRONMENT,
        }
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment used for mappings without an `environment` label
    pub fn with_default_environment(mut self, environment: Environment) -> Self {
        self.default_environment = environment;
        self
    }

    /// Validate `raw`, returning every violation found
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<ProvisioningConfig, ConfigError> {
        let mut check = Checker {
            raw,
            violations: Vec::new(),
        };

        let cluster_name = check.required_string("cluster_name");
        let usable_name = cluster_name
            .as_deref()
            .filter(|name| check.cluster_name(name));

        let role = check.role_reference(usable_name);

        let subnet_ids = check.id_list("subnet_ids");
        let security_group_ids = check.id_list("security_group_ids");
        if let (Some(subnets), Some(groups)) = (&subnet_ids, &security_group_ids) {
            check.id_namespaces(subnets, groups);
        }

        let autoscaling_group_name = check.required_string("autoscaling_group_name");
        let desired_capacity = check.desired_capacity();
        let environment = check.environment(self.default_environment);

        let region = check.optional_matching("region", &REGION_REGEX, "a region like us-east-1");
        let kubernetes_version = check.optional_matching(
            "kubernetes_version",
            &K8S_VERSION_REGEX,
            "a <major>.<minor> version",
        );
        let alarm_topic_arn =
            check.optional_matching("alarm_topic_arn", &TOPIC_ARN_REGEX, "an SNS topic ARN");
        let metric_namespace = check.optional_string("metric_namespace");
        let tags = check.tags();

        if !check.violations.is_empty() {
            return Err(ConfigError::Invalid(check.violations));
        }

        match (
            cluster_name,
            role,
            subnet_ids,
            security_group_ids,
            autoscaling_group_name,
            desired_capacity,
            environment,
        ) {
            (
                Some(cluster_name),
                Some(role),
                Some(subnet_ids),
                Some(security_group_ids),
                Some(autoscaling_group_name),
                Some(desired_capacity),
                Some(environment),
            ) => Ok(ProvisioningConfig {
                cluster_name,
                role,
                subnet_ids,
                security_group_ids,
                autoscaling_group_name,
                desired_capacity,
                environment,
                region,
                kubernetes_version,
                alarm_topic_arn,
                metric_namespace,
                tags,
            }),
            // Every None above pushed a violation
            _ => Err(ConfigError::Invalid(vec![Violation::new(
                "configuration",
                ViolationKind::Malformed,
                "configuration is incomplete",
            )])),
        }
    }

    /// Warnings for secrets the environment does not provide
    pub fn validate_secrets(&self, signal: SecretsSignal) -> Vec<String> {
        let mut warnings = Vec::new();
        if !signal.api_key_present {
            warnings.push(format!(
                "{} is not set in the environment",
                SecretsSignal::API_KEY_VAR
            ));
        }
        if !signal.db_password_present {
            warnings.push(format!(
                "{} is not set in the environment",
                SecretsSignal::DB_PASSWORD_VAR
            ));
        }
        warnings
    }
}

struct Checker<'a> {
    raw: &'a Map<String, Value>,
    violations: Vec<Violation>,
}

impl<'a> Checker<'a> {
    fn push(&mut self, key: &str, kind: ViolationKind, message: impl Into<String>) {
        self.violations.push(Violation::new(key, kind, message));
    }

    fn present(&self, key: &str) -> Option<&'a Value> {
        self.raw.get(key).filter(|v| !v.is_null())
    }

    fn required_string(&mut self, key: &str) -> Option<String> {
        match self.present(key) {
            None => {
                self.push(key, ViolationKind::Missing, "required key is missing");
                None
            }
            Some(value) => self.string_value(key, value),
        }
    }

    fn optional_string(&mut self, key: &str) -> Option<String> {
        let value = self.present(key)?;
        self.string_value(key, value)
    }

    fn string_value(&mut self, key: &str, value: &Value) -> Option<String> {
        match value.as_str() {
            None => {
                self.push(key, ViolationKind::WrongType, "expected a string");
                None
            }
            Some(s) if s.trim().is_empty() => {
                self.push(key, ViolationKind::Empty, "must not be empty");
                None
            }
            Some(s) => Some(s.trim().to_string()),
        }
    }

    fn optional_matching(&mut self, key: &str, pattern: &Regex, expected: &str) -> Option<String> {
        let value = self.optional_string(key)?;
        if pattern.is_match(&value) {
            Some(value)
        } else {
            self.push(
                key,
                ViolationKind::Malformed,
                format!("'{}' is not {}", value, expected),
            );
            None
        }
    }

    /// Check the cluster name's shape; true when it is usable
    fn cluster_name(&mut self, name: &str) -> bool {
        let before = self.violations.len();
        if name.len() > MAX_CLUSTER_NAME_LENGTH {
            self.push(
                "cluster_name",
                ViolationKind::Malformed,
                format!("too long (max {} characters)", MAX_CLUSTER_NAME_LENGTH),
            );
        }
        if !CLUSTER_NAME_REGEX.is_match(name) {
            self.push(
                "cluster_name",
                ViolationKind::Malformed,
                "must start with a letter or digit and contain only letters, digits, hyphens and underscores",
            );
        }
        self.violations.len() == before
    }

    /// Role from `role_arn` or `role_name`, or the cluster's default role
    /// when neither is given
    fn role_reference(&mut self, cluster_name: Option<&str>) -> Option<RoleReference> {
        let has_arn = self.present("role_arn").is_some();
        let has_name = self.present("role_name").is_some();

        match (has_arn, has_name) {
            (true, true) => {
                self.push(
                    "role_arn",
                    ViolationKind::Conflict,
                    "role_arn and role_name are mutually exclusive",
                );
                None
            }
            (false, false) => match cluster_name {
                Some(cluster_name) => Some(RoleReference::Create {
                    name: default_role_name(cluster_name),
                }),
                None => {
                    self.push(
                        "role_arn",
                        ViolationKind::Missing,
                        "either role_arn or role_name is required without a usable cluster_name",
                    );
                    None
                }
            },
            (true, false) => {
                let arn = self.optional_string("role_arn")?;
                if is_role_arn(&arn) {
                    Some(RoleReference::Arn { arn })
                } else {
                    self.push(
                        "role_arn",
                        ViolationKind::Malformed,
                        format!("'{}' is not an IAM role ARN", arn),
                    );
                    None
                }
            }
            (false, true) => {
                let name = self.optional_string("role_name")?;
                Some(RoleReference::Create { name })
            }
        }
    }

    fn id_list(&mut self, key: &str) -> Option<Vec<String>> {
        let items = match self.present(key) {
            None => {
                self.push(key, ViolationKind::Missing, "required key is missing");
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.push(key, ViolationKind::WrongType, "expected a list of strings");
                return None;
            }
        };

        if items.is_empty() {
            self.push(key, ViolationKind::Empty, "must contain at least one id");
            return None;
        }

        let mut ids = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();
        let mut valid = true;

        for (index, item) in items.iter().enumerate() {
            let entry = format!("{}[{}]", key, index);
            match item.as_str().map(str::trim) {
                None => {
                    self.push(&entry, ViolationKind::WrongType, "expected a string");
                    valid = false;
                }
                Some("") => {
                    self.push(&entry, ViolationKind::Empty, "must not be empty");
                    valid = false;
                }
                Some(id) if id.chars().any(char::is_whitespace) => {
                    self.push(&entry, ViolationKind::Malformed, "must not contain whitespace");
                    valid = false;
                }
                Some(id) => {
                    if !seen.insert(id.to_string()) {
                        self.push(
                            &entry,
                            ViolationKind::Duplicate,
                            format!("'{}' is listed more than once", id),
                        );
                        valid = false;
                    }
                    ids.push(id.to_string());
                }
            }
        }

        valid.then_some(ids)
    }

    /// Subnet and security-group ids must not cross namespaces
    fn id_namespaces(&mut self, subnets: &[String], groups: &[String]) {
        for id in subnets {
            if id.starts_with("sg-") {
                self.push(
                    "subnet_ids",
                    ViolationKind::Malformed,
                    format!("'{}' looks like a security group id", id),
                );
            }
        }
        for id in groups {
            if id.starts_with("subnet-") {
                self.push(
                    "security_group_ids",
                    ViolationKind::Malformed,
                    format!("'{}' looks like a subnet id", id),
                );
            }
            if subnets.contains(id) {
                self.push(
                    "security_group_ids",
                    ViolationKind::Conflict,
                    format!("'{}' is also listed as a subnet id", id),
                );
            }
        }
    }

    fn desired_capacity(&mut self) -> Option<u32> {
        const KEY: &str = "desired_capacity";

        let value = match self.present(KEY) {
            None => {
                self.push(KEY, ViolationKind::Missing, "required key is missing");
                return None;
            }
            Some(value) => value,
        };

        let Some(number) = value.as_i64() else {
            let message = if value.is_number() {
                "must be a whole number"
            } else {
                "expected an integer"
            };
            self.push(KEY, ViolationKind::WrongType, message);
            return None;
        };

        if number <= 0 {
            self.push(
                KEY,
                ViolationKind::Malformed,
                format!("must be a positive integer, got {}", number),
            );
            return None;
        }

        match u32::try_from(number) {
            Ok(capacity) => Some(capacity),
            Err(_) => {
                self.push(KEY, ViolationKind::Malformed, format!("{} is too large", number));
                None
            }
        }
    }

    fn environment(&mut self, default: Environment) -> Option<Environment> {
        if self.present("environment").is_none() {
            return Some(default);
        }
        let label = self.required_string("environment")?;
        match label.parse::<Environment>() {
            Ok(env) => Some(env),
            Err(e) => {
                self.push("environment", ViolationKind::UnknownEnvironment, e.to_string());
                None
            }
        }
    }

    fn tags(&mut self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        let Some(value) = self.present("tags") else {
            return tags;
        };

        let Some(map) = value.as_object() else {
            self.push("tags", ViolationKind::WrongType, "expected a mapping of strings");
            return tags;
        };

        for (name, value) in map {
            match value.as_str() {
                Some(v) => {
                    tags.insert(name.clone(), v.to_string());
                }
                None => self.push(
                    &format!("tags.{}", name),
                    ViolationKind::WrongType,
                    "tag values must be strings",
                ),
            }
        }
        tags
    }
}
