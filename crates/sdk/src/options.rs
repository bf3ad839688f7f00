// SPDX-License-Identifier: MIT

//! Plugin options: command line plus an optional TOML config file.
//!
//! Every option can come from either place; the command line wins. Keys in
//! the file use the long option names.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_JOB_EXPIRY_HOURS: u64 = 24;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_RSANDBOX_PATH: &str = "/usr/lib/rstudio-server/bin/rsandbox";
pub const DEFAULT_SCRATCH_PATH: &str = "/var/lib/rstudio-launcher/";
pub const DEFAULT_SERVER_USER: &str = "rstudio-server";

/// Maximum log level to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// The tracing env-filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The command-line surface. Every field is optional so file values can
/// fill in anything the command line left unset.
#[derive(Debug, Default, Parser)]
#[command(name = "lpd", about = "Launcher plugin for local job execution", version)]
pub struct Cli {
    /// Path to a TOML config file with the same option names
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Whether to enable debug logging (forces a log level of at least debug)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub enable_debug_logging: Option<bool>,

    /// Hours from a job's last update until it is pruned
    #[arg(long)]
    pub job_expiry_hours: Option<u64>,

    /// Seconds between unsolicited heartbeats (0 disables them)
    #[arg(long)]
    pub heartbeat_interval_seconds: Option<u64>,

    /// Path to the launcher-provided configuration file
    #[arg(long)]
    pub launcher_config_file: Option<PathBuf>,

    /// Maximum level of log messages to write
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Maximum allowed message size in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Name of this plugin instance
    #[arg(long)]
    pub plugin_name: Option<String>,

    /// Path to the rsandbox executable
    #[arg(long)]
    pub rsandbox_path: Option<PathBuf>,

    /// Scratch path where job state and output are stored
    #[arg(long)]
    pub scratch_path: Option<PathBuf>,

    /// System user the plugin runs as
    #[arg(long)]
    pub server_user: Option<String>,

    /// Worker threads for the shared runtime (default max(4, cores))
    #[arg(long)]
    pub thread_pool_size: Option<usize>,

    /// Unprivileged mode: no impersonation, single user, no root
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub unprivileged: Option<bool>,

    /// Directory for plugin log files (stderr when unset)
    #[arg(long)]
    pub logging_dir: Option<PathBuf>,

    /// Assign output files under the scratch path when a job names none
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub save_unspecified_output: Option<bool>,
}

/// File counterpart of [`Cli`]; keys are the long option names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileOptions {
    enable_debug_logging: Option<bool>,
    job_expiry_hours: Option<u64>,
    heartbeat_interval_seconds: Option<u64>,
    launcher_config_file: Option<PathBuf>,
    log_level: Option<LogLevel>,
    max_message_size: Option<usize>,
    plugin_name: Option<String>,
    rsandbox_path: Option<PathBuf>,
    scratch_path: Option<PathBuf>,
    server_user: Option<String>,
    thread_pool_size: Option<usize>,
    unprivileged: Option<bool>,
    logging_dir: Option<PathBuf>,
    save_unspecified_output: Option<bool>,
}

/// Fully resolved plugin options.
#[derive(Debug, Clone)]
pub struct Options {
    pub enable_debug_logging: bool,
    pub job_expiry_hours: u64,
    pub heartbeat_interval_seconds: u64,
    pub launcher_config_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub max_message_size: usize,
    pub plugin_name: String,
    pub rsandbox_path: PathBuf,
    pub scratch_path: PathBuf,
    pub server_user: String,
    pub thread_pool_size: Option<usize>,
    pub unprivileged: bool,
    pub logging_dir: Option<PathBuf>,
    pub save_unspecified_output: bool,
}

impl Options {
    /// Parse the process command line and resolve against its config file.
    pub fn load() -> Result<Self, OptionsError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, OptionsError> {
        let file = match &cli.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|source| OptionsError::Read { path: path.clone(), source })?;
                toml::from_str(&text)
                    .map_err(|source| OptionsError::Parse { path: path.clone(), source })?
            }
            None => FileOptions::default(),
        };
        Ok(Self::resolve(cli, file))
    }

    fn resolve(cli: Cli, file: FileOptions) -> Self {
        Self {
            enable_debug_logging: cli
                .enable_debug_logging
                .or(file.enable_debug_logging)
                .unwrap_or(false),
            job_expiry_hours: cli
                .job_expiry_hours
                .or(file.job_expiry_hours)
                .unwrap_or(DEFAULT_JOB_EXPIRY_HOURS),
            heartbeat_interval_seconds: cli
                .heartbeat_interval_seconds
                .or(file.heartbeat_interval_seconds)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECONDS),
            launcher_config_file: cli.launcher_config_file.or(file.launcher_config_file),
            log_level: cli.log_level.or(file.log_level).unwrap_or(LogLevel::Warning),
            max_message_size: cli
                .max_message_size
                .or(file.max_message_size)
                .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            plugin_name: cli.plugin_name.or(file.plugin_name).unwrap_or_else(|| "local".to_string()),
            rsandbox_path: cli
                .rsandbox_path
                .or(file.rsandbox_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RSANDBOX_PATH)),
            scratch_path: cli
                .scratch_path
                .or(file.scratch_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_PATH)),
            server_user: cli
                .server_user
                .or(file.server_user)
                .unwrap_or_else(|| DEFAULT_SERVER_USER.to_string()),
            thread_pool_size: cli.thread_pool_size.or(file.thread_pool_size),
            unprivileged: cli.unprivileged.or(file.unprivileged).unwrap_or(false),
            logging_dir: cli.logging_dir.or(file.logging_dir),
            save_unspecified_output: cli
                .save_unspecified_output
                .or(file.save_unspecified_output)
                .unwrap_or(true),
        }
    }

    /// Effective log level: `enable-debug-logging` raises it to debug.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.enable_debug_logging {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    /// Worker threads for the shared runtime: `max(4, hw-concurrency)`
    /// unless overridden.
    pub fn worker_threads(&self) -> usize {
        self.thread_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism().map(usize::from).unwrap_or(1).max(4)
        })
    }

    /// Retention window for completed jobs.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.job_expiry_hours as i64)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
