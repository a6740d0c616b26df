//! Command-line surface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::error::ProvisionError;
use crate::source::Settings;
use crate::state::RunStatus;

pub const EXIT_COMPLETED: u8 = 0;
/// Invalid configuration, declined confirmation or failed preflight.
pub const EXIT_INVALID: u8 = 1;
/// Some step failed or was blocked; `--resume` continues the run.
pub const EXIT_HALTED: u8 = 2;
pub const EXIT_IN_PROGRESS: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "alicerce")]
#[command(version)]
#[command(about = "Provision an Ubuntu server for a web application", long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision this server, or resume an interrupted run
    Run(RunArgs),

    /// Print the provisioning steps in execution order
    Plan,

    /// Show the recorded state of the last run
    Status(StatusArgs),
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Domain the application is served on
    #[arg(long, env = "ALICERCE_DOMAIN")]
    pub domain: Option<String>,

    /// Contact email for the certificate authority
    #[arg(long, env = "ALICERCE_EMAIL")]
    pub email: Option<String>,

    /// Password for the application database role
    #[arg(long, env = "ALICERCE_DATABASE_PASSWORD", hide_env_values = true)]
    pub database_password: Option<String>,

    /// API key written to the backend environment
    #[arg(long, env = "ALICERCE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// DNS already points at this server, so a certificate can be issued
    #[arg(
        long,
        env = "ALICERCE_DNS_READY",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub dns_ready: Option<bool>,

    /// Application name, used for the unit, site and database
    #[arg(long, env = "ALICERCE_APP_NAME")]
    pub app_name: Option<String>,

    /// Port the backend listens on
    #[arg(long, env = "ALICERCE_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Node.js major version
    #[arg(long, env = "ALICERCE_NODE_MAJOR")]
    pub node_major: Option<u16>,

    /// YAML settings file; flags take precedence
    #[arg(long, env = "ALICERCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Never prompt; fail if a required value is missing
    #[arg(long, env = "ALICERCE_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Continue the last recorded run
    #[arg(long)]
    pub resume: bool,

    /// Check which steps would run without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds a single step may take
    #[arg(
        long,
        env = "ALICERCE_STEP_TIMEOUT",
        default_value_t = 900,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub step_timeout: u64,

    /// Directory for the run state and its lock
    #[arg(long, env = "ALICERCE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Run without root privileges (for testing)
    #[arg(long)]
    pub skip_root_check: bool,
}

impl RunArgs {
    /// Values given on the command line or through the environment.
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            domain: self.domain.clone(),
            contact_email: self.email.clone(),
            database_password: self.database_password.clone(),
            api_key: self.api_key.clone(),
            dns_ready: self.dns_ready,
            app_name: self.app_name.clone(),
            backend_port: self.backend_port,
            node_major: self.node_major,
            ..Settings::default()
        }
    }

    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout)
    }

    /// Command that continues this run. Secrets are left out; they
    /// come from the environment or the settings file again.
    #[must_use]
    pub fn resume_command(&self) -> String {
        let mut parts = vec!["alicerce run --resume".to_string()];
        if let Some(config) = &self.config {
            parts.push(format!("--config {}", config.display()));
        }
        if let Some(dir) = &self.state_dir {
            parts.push(format!("--state-dir {}", dir.display()));
        }
        if self.non_interactive {
            parts.push("--non-interactive".to_string());
        }
        parts.join(" ")
    }
}

#[derive(Debug, Default, Args)]
pub struct StatusArgs {
    /// Directory for the run state and its lock
    #[arg(long, env = "ALICERCE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

#[must_use]
pub fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    if quiet {
        return log::LevelFilter::Error;
    }
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

#[must_use]
pub const fn exit_code_for_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Completed => EXIT_COMPLETED,
        RunStatus::NotStarted => EXIT_INVALID,
        RunStatus::InProgress | RunStatus::Halted => EXIT_HALTED,
    }
}

#[must_use]
pub const fn exit_code_for_error(err: &ProvisionError) -> u8 {
    match err {
        ProvisionError::RunAlreadyInProgress { .. } => EXIT_IN_PROGRESS,
        _ => EXIT_INVALID,
    }
}

/// Exit code for an error that ended the command.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(
        err.downcast_ref::<ProvisionError>()
            .map_or(EXIT_INVALID, exit_code_for_error),
    )
}
