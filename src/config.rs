//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};

use crate::error::UpgradeError;
use crate::topology::EngineVersion;
use crate::upgrade::{PhaseDeadlines, RehydrateMode, SessionConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("SSUP_BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("SSUP_BUILD_DATE");

/// State-server upgrade coordinator.
///
/// Upgrades the database engine of a replica set one role at a time:
/// secondaries are quiesced, the primary is upgraded, then secondaries
/// are rebuilt from it and verified.
#[derive(Parser, Debug, Clone)]
#[command(name = "ssup")]
#[command(about = "Rolling database engine upgrades for state-server replica sets")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "SSUP_LOG_LEVEL")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upgrade every state server to a new engine version
    Upgrade(UpgradeArgs),
}

#[derive(clap::Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("authority")
        .required(true)
        .args(["inventory", "status_command"])
))]
pub struct UpgradeArgs {
    /// Target engine version (e.g., 3.2, 3.2.1 or 3.2/wiredTiger)
    #[arg(short, long)]
    pub target: EngineVersion,

    /// Static inventory file listing members (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    pub inventory: Option<PathBuf>,

    /// Shell command that prints replica-set membership as JSON (run via `sh -c`)
    #[arg(long, value_name = "COMMAND", env = "SSUP_STATUS_COMMAND")]
    pub status_command: Option<String>,

    /// Run scripts on this host instead of over ssh
    #[arg(long, default_value = "false")]
    pub local: bool,

    /// Remote user for ssh
    #[arg(long, default_value = "ubuntu", env = "SSUP_SSH_USER")]
    pub ssh_user: String,

    /// Extra ssh option, passed as `-o OPTION` (repeatable)
    #[arg(long = "ssh-option", value_name = "OPTION")]
    pub ssh_options: Vec<String>,

    /// Ssh connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Maximum members worked on at once in fan-out phases
    #[arg(long, default_value_t = 2)]
    pub max_concurrency: usize,

    /// How secondaries are rebuilt from the upgraded primary
    #[arg(long, value_enum, default_value_t = RehydrateMode::Reseed)]
    pub rehydrate_mode: RehydrateMode,

    /// Per-member deadline for the notify step, in seconds
    #[arg(long, default_value_t = 30)]
    pub notify_timeout: u64,

    /// Per-member deadline for quiescing a secondary, in seconds
    #[arg(long, default_value_t = 300)]
    pub quiesce_timeout: u64,

    /// Deadline for upgrading the primary, in seconds
    #[arg(long, default_value_t = 3600)]
    pub upgrade_timeout: u64,

    /// Per-member deadline for rehydrating a secondary, in seconds
    #[arg(long, default_value_t = 1800)]
    pub rehydrate_timeout: u64,

    /// Per-member deadline for verification, in seconds
    #[arg(long, default_value_t = 120)]
    pub verify_timeout: u64,

    /// How often remote output is flushed to the console, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub drain_interval_ms: u64,

    /// Skip confirmation prompt
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Show upgrade plan without executing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Send remote output to the log (visible at info level) instead of the console
    #[arg(long, default_value = "false")]
    pub quiet_output: bool,

    /// Write a JSON session report to this file or directory
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// Where the topology comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthoritySource {
    Inventory(PathBuf),
    Command(String),
}

/// How rendered scripts reach a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Local,
    Ssh {
        user: String,
        options: Vec<String>,
        connect_timeout: Duration,
    },
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub target: EngineVersion,
    pub authority: AuthoritySource,
    pub transport: TransportKind,
    pub session: SessionConfig,
    pub yes: bool,
    pub dry_run: bool,
    pub quiet_output: bool,
    pub report: Option<PathBuf>,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Result<Self, UpgradeError> {
        let Command::Upgrade(upgrade) = args.command;

        let authority = match (upgrade.inventory, upgrade.status_command) {
            (Some(path), _) => AuthoritySource::Inventory(path),
            (None, Some(command)) if !command.trim().is_empty() => {
                AuthoritySource::Command(command)
            }
            _ => {
                return Err(UpgradeError::InvalidConfig(
                    "one of --inventory or --status-command is required".to_string(),
                ));
            }
        };

        let transport = if upgrade.local {
            TransportKind::Local
        } else {
            if upgrade.ssh_user.trim().is_empty() {
                return Err(UpgradeError::InvalidConfig(
                    "--ssh-user must not be empty".to_string(),
                ));
            }
            TransportKind::Ssh {
                user: upgrade.ssh_user,
                options: upgrade.ssh_options,
                connect_timeout: Duration::from_secs(upgrade.connect_timeout),
            }
        };

        let session = SessionConfig {
            deadlines: PhaseDeadlines {
                notify: Duration::from_secs(upgrade.notify_timeout),
                quiesce: Duration::from_secs(upgrade.quiesce_timeout),
                upgrade: Duration::from_secs(upgrade.upgrade_timeout),
                rehydrate: Duration::from_secs(upgrade.rehydrate_timeout),
                verify: Duration::from_secs(upgrade.verify_timeout),
            },
            max_concurrency: upgrade.max_concurrency,
            drain_interval: Duration::from_millis(upgrade.drain_interval_ms),
            rehydrate_mode: upgrade.rehydrate_mode,
        };
        session.validate()?;

        Ok(Self {
            log_level: args.log_level,
            target: upgrade.target,
            authority,
            transport,
            session,
            yes: upgrade.yes,
            dry_run: upgrade.dry_run,
            quiet_output: upgrade.quiet_output,
            report: upgrade.report,
        })
    }

    /// Check if the operator must confirm before execution.
    pub fn is_interactive(&self) -> bool {
        !self.yes && !self.dry_run
    }
}
