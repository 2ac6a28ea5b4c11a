use crate::loader;
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use futures::future::join_all;
use serde_json::{Map, Value};
use skyforge_common::TerminalStatus;
use skyforge_core::lock::LockFile;
use skyforge_core::{
    CancelHandle, CancelSignal, HttpProvider, ProviderSet, ProvisioningConfig,
    ProvisioningOrchestrator, ProvisioningReport, SecretsSignal, SimulatedProvider, SkyforgeConfig,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Upper bound of every autoscaling group the dry-run provider invents
const DRY_RUN_GROUP_MAX: u32 = 100;

#[derive(Args)]
pub struct ProvisionArgs {
    /// Environments to provision (dev, staging, production)
    #[arg(required = true)]
    pub environments: Vec<String>,

    /// Directory holding <env>_config.json files
    #[arg(short, long, default_value = ".")]
    pub config_dir: PathBuf,

    /// Run against the in-memory provider instead of the gateway
    #[arg(long)]
    pub dry_run: bool,

    /// Write the JSON reports to this file
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Directory for per-cluster lock files
    #[arg(long, default_value = ".skyforge/locks")]
    pub lock_dir: PathBuf,
}

pub async fn handle_provision_command(
    args: ProvisionArgs,
    settings: &SkyforgeConfig,
    output_format: OutputFormat,
) -> Result<u8> {
    let configs = load_all(&args.config_dir, &args.environments)?;

    let providers = if args.dry_run {
        ProviderSet::uniform(Arc::new(SimulatedProvider::for_dry_run(DRY_RUN_GROUP_MAX)))
    } else {
        let mut client = HttpProvider::new(&settings.provider.endpoint, settings.connect_timeout())
            .context("Failed to create provider client")?;
        if let Some(token) = &settings.provider.token {
            client = client.with_token(token);
        }
        ProviderSet::uniform(Arc::new(client))
    };

    let orchestrator = ProvisioningOrchestrator::new(providers, settings.orchestrator_settings())
        .with_dry_run(args.dry_run);

    // Lock files are named after validated cluster names only
    let validated: Vec<Option<ProvisioningConfig>> = configs
        .iter()
        .map(|raw| orchestrator.validate(raw).ok())
        .collect();
    let _locks = acquire_locks(&args.lock_dir, validated.iter().flatten())?;

    let cancel = CancelHandle::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { cancel.cancel_on_os_signal().await })
    };

    info!(
        environments = args.environments.len(),
        dry_run = args.dry_run,
        "Starting provisioning"
    );
    let signal = cancel.signal();
    let secrets = SecretsSignal::from_env();
    let reports = join_all(configs.iter().zip(&validated).map(|(raw, config)| {
        run_one(&orchestrator, raw, config.as_ref(), secrets, &signal)
    }))
    .await;
    watcher.abort();

    for report in &reports {
        report.emit();
    }

    if let Some(path) = &args.report_file {
        write_reports(path, &reports)?;
        output::print_success(&format!("Report written to {}", path.display()));
    }

    output::print_reports(&reports, output_format)?;
    Ok(worst_exit_code(reports.iter().map(|r| r.status)))
}

fn load_all(dir: &Path, environments: &[String]) -> Result<Vec<Map<String, Value>>> {
    environments
        .iter()
        .map(|selector| {
            let environment = loader::parse_environment(selector)?;
            loader::load_environment_config(dir, environment)
        })
        .collect()
}

/// Valid configurations skip straight to provisioning; invalid ones go
/// through `run` so their report carries the violations
async fn run_one(
    orchestrator: &ProvisioningOrchestrator,
    raw: &Map<String, Value>,
    config: Option<&ProvisioningConfig>,
    secrets: SecretsSignal,
    cancel: &CancelSignal,
) -> ProvisioningReport {
    match config {
        Some(config) => orchestrator.run_config(config, secrets, cancel).await,
        None => orchestrator.run(raw, secrets, cancel).await,
    }
}

/// One lock file per distinct cluster name; repeats within one invocation
/// are serialized by the orchestrator's in-process locks
fn acquire_locks<'a>(
    dir: &Path,
    configs: impl IntoIterator<Item = &'a ProvisioningConfig>,
) -> Result<Vec<LockFile>> {
    let names: BTreeSet<&str> = configs
        .into_iter()
        .map(|config| config.cluster_name.as_str())
        .collect();

    names
        .into_iter()
        .map(|name| LockFile::acquire(dir, name).map_err(anyhow::Error::from))
        .collect()
}

fn write_reports(path: &Path, reports: &[ProvisioningReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Exit code of the most severe outcome across all runs
fn worst_exit_code(statuses: impl IntoIterator<Item = TerminalStatus>) -> u8 {
    statuses
        .into_iter()
        .max_by_key(TerminalStatus::severity)
        .map(|s| s.exit_code())
        .unwrap_or(TerminalStatus::EXIT_SUCCEEDED)
}
