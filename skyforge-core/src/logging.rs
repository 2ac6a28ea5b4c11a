//! Logging configuration
//!
//! Console output always goes to stderr so stdout stays clean for reports.
//! An optional rolling JSON file layer can be added.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "skyforge.log";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for JSON log files; console only when unset
    pub log_dir: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Emit console logs as JSON
    pub json_console: bool,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            rotation: LogRotation::Daily,
            json_console: false,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber
    ///
    /// The returned guard flushes the file layer; keep it alive until exit.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_ansi(!self.json_console)
            .with_writer(io::stderr);
        let console_layer = if self.json_console {
            console_layer.json().boxed()
        } else {
            console_layer.boxed()
        };

        let (file_layer, guard) = match &self.log_dir {
            Some(dir) => {
                let appender = match self.rotation {
                    LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_PREFIX),
                    LogRotation::Daily => rolling::daily(dir, LOG_FILE_PREFIX),
                    LogRotation::Never => rolling::never(dir, LOG_FILE_PREFIX),
                };
                let (writer, guard) = non_blocking(appender);
                let layer = fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!(level = %self.level, file = self.log_dir.is_some(), "Logging initialized");
        Ok(guard)
    }
}

/// Log a stage transition with run context
#[macro_export]
macro_rules! log_stage {
    ($stage:expr, $cluster:expr, $msg:expr) => {
        tracing::info!(
            stage = %$stage,
            cluster = %$cluster,
            $msg
        )
    };
    ($stage:expr, $cluster:expr, $msg:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            stage = %$stage,
            cluster = %$cluster,
            $($key = $value),+,
            $msg
        )
    };
}

/// Log a provider call made on behalf of a run
#[macro_export]
macro_rules! log_provider_call {
    ($operation:expr, $ctx:expr) => {
        tracing::debug!(
            operation = $operation,
            run_id = %$ctx.run_id,
            region = %$ctx.region,
            "Provider call"
        )
    };
    ($operation:expr, $ctx:expr, $target:expr) => {
        tracing::debug!(
            operation = $operation,
            run_id = %$ctx.run_id,
            region = %$ctx.region,
            target = %$target,
            "Provider call"
        )
    };
}
