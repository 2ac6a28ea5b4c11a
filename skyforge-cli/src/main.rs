//! Skyforge CLI
//!
//! Command-line interface for provisioning managed Kubernetes clusters

mod commands;
mod loader;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::OutputFormat;
use skyforge_core::SkyforgeConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for usage and configuration-file errors found before any run
const EXIT_USAGE: u8 = 3;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (defaults to SKYFORGE_CONFIG, /etc/skyforge/config.toml, ./skyforge.toml)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the cluster described by each environment's config file
    Provision(commands::provision::ProvisionArgs),
    /// Validate an environment's config file without touching the provider
    Validate {
        /// Environment (dev, staging, production)
        environment: String,
        /// Directory holding <env>_config.json files
        #[arg(short, long, default_value = ".")]
        config_dir: PathBuf,
    },
    /// Print a sample settings file
    SampleConfig,
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    match &cli.command {
        Commands::SampleConfig => {
            print!("{}", SkyforgeConfig::generate_sample());
            return Ok(0);
        }
        Commands::Completions { shell } => {
            generate_completions(*shell);
            return Ok(0);
        }
        _ => {}
    }

    let settings = SkyforgeConfig::load_from(cli.settings.as_deref())
        .context("Failed to load settings")?;
    let _log_guard = settings
        .logging
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    match cli.command {
        Commands::Provision(args) => {
            commands::provision::handle_provision_command(args, &settings, cli.output).await
        }
        Commands::Validate {
            environment,
            config_dir,
        } => commands::validate::handle_validate_command(&environment, &config_dir, cli.output),
        Commands::SampleConfig | Commands::Completions { .. } => Ok(0),
    }
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}
