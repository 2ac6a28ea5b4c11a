use crate::loader;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use skyforge_common::TerminalStatus;
use skyforge_core::validation::{ProvisioningConfig, Violation};
use skyforge_core::{ConfigValidator, SecretsSignal};
use std::path::Path;

#[derive(Serialize)]
struct ValidationOutcome {
    environment: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ProvisioningConfig>,
    violations: Vec<Violation>,
    warnings: Vec<String>,
}

pub fn handle_validate_command(
    environment: &str,
    config_dir: &Path,
    output_format: OutputFormat,
) -> Result<u8> {
    let environment = loader::parse_environment(environment)?;
    let raw = loader::load_environment_config(config_dir, environment)?;

    let validator = ConfigValidator::new();
    let warnings = validator.validate_secrets(SecretsSignal::from_env());
    let (config, violations) = match validator.validate(&raw) {
        Ok(config) => (Some(config), Vec::new()),
        Err(e) => (None, e.violations().to_vec()),
    };

    let outcome = ValidationOutcome {
        environment: environment.to_string(),
        valid: config.is_some(),
        config,
        violations,
        warnings,
    };

    match output_format {
        OutputFormat::Json => output::print_json(&outcome)?,
        OutputFormat::Yaml => output::print_yaml(&outcome)?,
        OutputFormat::Table => {
            for warning in &outcome.warnings {
                output::print_warning(warning);
            }
            match &outcome.config {
                Some(config) => output::print_success(&format!(
                    "{} configuration is valid (cluster '{}', {} subnet(s), capacity {})",
                    environment,
                    config.cluster_name,
                    config.subnet_ids.len(),
                    config.desired_capacity
                )),
                None => {
                    output::print_error(&format!(
                        "{} configuration has {} violation(s)",
                        environment,
                        outcome.violations.len()
                    ));
                    output::print_violations(&outcome.violations);
                }
            }
        }
    }

    Ok(if outcome.valid {
        TerminalStatus::EXIT_SUCCEEDED
    } else {
        TerminalStatus::EXIT_FAILED
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_exit_codes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("dev_config.json"),
            r#"{
                "cluster_name": "dev-cluster",
                "role_name": "dev-cluster-role",
                "subnet_ids": ["s1", "s2"],
                "security_group_ids": ["sg1"],
                "autoscaling_group_name": "dev-asg",
                "desired_capacity": 2
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging_config.json"),
            r#"{"cluster_name": "staging-cluster"}"#,
        )
        .unwrap();

        assert_eq!(handle_validate_command("dev", dir.path(), OutputFormat::Json).unwrap(), 0);
        assert_eq!(
            handle_validate_command("staging", dir.path(), OutputFormat::Json).unwrap(),
            1
        );
    }

    #[test]
    fn test_unknown_environment_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(handle_validate_command("qa", dir.path(), OutputFormat::Table).is_err());
    }
}
