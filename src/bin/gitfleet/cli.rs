use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gitfleet::config::SyncConfig;
use gitfleet::job::CloneStrategy;

#[derive(Debug, Parser)]
#[command(name = "gitfleet", version, about = "Fleet-wide git mirroring and environment switching")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Clone or update every repository under a provider/owner.
    Sync(SyncArgs),
    /// Environment-switching commands.
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum EnvCommand {
    /// Switch every configured service to the environment named in the
    /// config file, in dependency order.
    Switch(EnvSwitchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// YAML config file; when given, overrides all other flags except
    /// `--owner`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub target: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub strategy: Option<CloneStrategyArg>,

    #[arg(long)]
    pub parallel: Option<usize>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub clean_stale: bool,

    /// Resume from a previously saved run instead of starting fresh.
    #[arg(long)]
    pub resume: bool,

    #[arg(long, value_enum, default_value = "detailed")]
    pub progress: ProgressArg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ProgressArg {
    Compact,
    Detailed,
    Quiet,
}

impl From<ProgressArg> for gitfleet::progress::RenderMode {
    fn from(value: ProgressArg) -> Self {
        match value {
            ProgressArg::Compact => gitfleet::progress::RenderMode::Compact,
            ProgressArg::Detailed => gitfleet::progress::RenderMode::Detailed,
            ProgressArg::Quiet => gitfleet::progress::RenderMode::Quiet,
        }
    }
}

impl SyncArgs {
    pub fn into_sync_config(self) -> Result<SyncConfig, gitfleet::GzhError> {
        let provider = self.provider.ok_or_else(|| {
            gitfleet::GzhError::ConfigInvalid("--provider is required without --config".to_string())
        })?;
        let owner = self.owner.ok_or_else(|| {
            gitfleet::GzhError::ConfigInvalid("--owner is required without --config".to_string())
        })?;
        let target = self.target.ok_or_else(|| {
            gitfleet::GzhError::ConfigInvalid("--target is required without --config".to_string())
        })?;

        Ok(SyncConfig {
            provider,
            owner,
            target,
            strategy: self.strategy.map(Into::into).unwrap_or(CloneStrategy::Pull),
            clean_stale: self.clean_stale,
            providers: Default::default(),
        })
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CloneStrategyArg {
    Reset,
    Pull,
    Fetch,
}

impl From<CloneStrategyArg> for CloneStrategy {
    fn from(value: CloneStrategyArg) -> Self {
        match value {
            CloneStrategyArg::Reset => CloneStrategy::Reset,
            CloneStrategyArg::Pull => CloneStrategy::Pull,
            CloneStrategyArg::Fetch => CloneStrategy::Fetch,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EnvSwitchArgs {
    #[arg(long)]
    pub config: PathBuf,

    /// Resolve and log what would switch without touching any backend.
    #[arg(long)]
    pub dry_run: bool,

    /// Switch every service within one dependency level concurrently.
    #[arg(long)]
    pub parallel: bool,

    /// Roll back already-switched services when a later one fails. ORed
    /// with the config file's own `rollback_on_error`, so either source
    /// can turn rollback on.
    #[arg(long)]
    pub rollback_on_error: bool,
}
