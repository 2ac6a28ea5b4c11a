//! Per-environment provisioning files
//!
//! Each environment keeps its settings in `<env>_config.json` next to the
//! others. The file's environment is implied by its name.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use skyforge_common::Environment;
use std::path::{Path, PathBuf};

pub fn config_path(dir: &Path, environment: Environment) -> PathBuf {
    dir.join(format!("{}_config.json", environment))
}

/// Parse an environment selector given on the command line
pub fn parse_environment(selector: &str) -> Result<Environment> {
    Ok(selector.parse::<Environment>()?)
}

/// Read the raw mapping for `environment`
///
/// `environment` is filled in from the selector when the file omits it.
pub fn load_environment_config(dir: &Path, environment: Environment) -> Result<Map<String, Value>> {
    let path = config_path(dir, environment);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let Value::Object(mut raw) = value else {
        bail!("{} must contain a JSON object", path.display());
    };

    raw.entry("environment")
        .or_insert_with(|| Value::String(environment.to_string()));

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_environment_is_injected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("dev_config.json"),
            r#"{"cluster_name": "dev-cluster", "desired_capacity": 2}"#,
        )
        .unwrap();

        let raw = load_environment_config(dir.path(), Environment::Dev).unwrap();
        assert_eq!(raw["environment"], "dev");
        assert_eq!(raw["cluster_name"], "dev-cluster");
    }

    #[test]
    fn test_file_environment_is_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("staging_config.json"),
            r#"{"environment": "production"}"#,
        )
        .unwrap();

        let raw = load_environment_config(dir.path(), Environment::Staging).unwrap();
        assert_eq!(raw["environment"], "production");
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_environment_config(dir.path(), Environment::Production).unwrap_err();
        assert!(err.to_string().contains("production_config.json"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dev_config.json"), "{ not json").unwrap();
        assert!(load_environment_config(dir.path(), Environment::Dev).is_err());

        std::fs::write(dir.path().join("dev_config.json"), "[1, 2]").unwrap();
        let err = load_environment_config(dir.path(), Environment::Dev).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_parse_environment() {
        assert_eq!(parse_environment("dev").unwrap(), Environment::Dev);
        assert!(parse_environment("qa").is_err());
    }
}
