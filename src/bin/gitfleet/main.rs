//! Thin CLI front-end: parses arguments, loads config, and dispatches into
//! the `gitfleet` library.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gitfleet::config::{load_environment_config, load_sync_config, resolve_token};
use gitfleet::context::Context;
use gitfleet::git::GitExecutor;
use gitfleet::http::{HttpConfig, HttpCore};
use gitfleet::job::Operation;
use gitfleet::provider::{CloneOptions, Credentials, Provider, ProviderRegistry};
use gitfleet::repo_pool::{JobRunner, RepositoryPoolConfig, RetryConfig};
use gitfleet::sync::{SyncOptions, SyncOrchestrator};
use gitfleet::switch::EnvironmentSwitcher;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, EnvCommand};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), gitfleet::GzhError> {
    let ctx = Context::new();
    let ctx_for_signal = ctx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctx_for_signal.cancel();
    });

    match cli.command {
        Command::Sync(args) => run_sync(&ctx, args).await,
        Command::Env { command: EnvCommand::Switch(args) } => run_env_switch(&ctx, args).await,
    }
}

async fn run_sync(ctx: &Context, args: cli::SyncArgs) -> Result<(), gitfleet::GzhError> {
    let mut sync_config = match &args.config {
        Some(path) => load_sync_config(path).await?,
        None => args.clone().into_sync_config()?,
    };

    if let Some(owner) = &args.owner {
        sync_config.owner = owner.clone();
    }

    let http = Arc::new(HttpCore::new(HttpConfig::default())?);
    let registry = ProviderRegistry::new(http);

    let provider_cfg = sync_config.providers.get(&sync_config.provider).cloned().unwrap_or_default();
    let base_url = provider_cfg
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(&sync_config.provider));
    let token = resolve_token(&sync_config.provider, provider_cfg.token.clone());

    let mut provider = registry.create(&sync_config.provider, base_url)?;
    if let Some(token) = token {
        provider.authenticate(Credentials::Token(token)).await?;
    }
    let provider: Arc<dyn Provider> = Arc::from(provider);

    let orchestrator = SyncOrchestrator::new(provider.clone());
    let git = Arc::new(GitExecutor::new());
    let runner: JobRunner = Arc::new(move |job, ctx| {
        let provider = provider.clone();
        let git = git.clone();
        Box::pin(async move {
            match job.operation {
                Operation::Clone => {
                    provider
                        .clone_repository(&job.repository, &job.local_path, CloneOptions::default())
                        .await?;
                    Ok(format!("cloned {}", job.name()))
                }
                Operation::Pull => {
                    git.execute(&ctx, &job.local_path, &["pull"]).await?;
                    Ok(format!("pulled {}", job.name()))
                }
                Operation::Fetch => {
                    git.execute(&ctx, &job.local_path, &["fetch"]).await?;
                    Ok(format!("fetched {}", job.name()))
                }
                Operation::Reset => {
                    git.execute(&ctx, &job.local_path, &["reset", "--hard", "HEAD"]).await?;
                    git.execute(&ctx, &job.local_path, &["pull"]).await?;
                    Ok(format!("reset {}", job.name()))
                }
                Operation::Config => Ok(format!("no configuration changes for {}", job.name())),
            }
        })
    });

    let pool = RepositoryPoolConfig {
        clone_concurrency: args.parallel.unwrap_or(10),
        retry: RetryConfig {
            max_retries: args.max_retries.unwrap_or(2),
            ..RetryConfig::default()
        },
        ..RepositoryPoolConfig::default()
    };
    let clean_stale = sync_config.clean_stale
        && confirm_stale_cleanup(&sync_config.target).unwrap_or(false);

    let opts = SyncOptions {
        provider: sync_config.provider.clone(),
        owner: sync_config.owner.clone(),
        target: sync_config.target.clone(),
        strategy: sync_config.strategy,
        pool,
        clean_stale,
        resume: args.resume,
        render_mode: args.progress.into(),
        ..SyncOptions::default()
    };

    let summary = orchestrator.run(ctx, opts, runner).await?;
    println!(
        "{}/{} repositories synced ({} failed)",
        summary.completed, summary.total, summary.failed
    );
    for (name, error) in &summary.failures {
        eprintln!("  {name}: {error}");
    }

    if summary.failed > 0 {
        return Err(gitfleet::GzhError::PartialFailure(format!(
            "{} repositories failed",
            summary.failed
        )));
    }
    Ok(())
}

async fn run_env_switch(_ctx: &Context, args: cli::EnvSwitchArgs) -> Result<(), gitfleet::GzhError> {
    let config = load_environment_config(&args.config).await?;
    let rollback_on_error = args.rollback_on_error || config.rollback_on_error;
    let mut switcher = EnvironmentSwitcher::new(rollback_on_error, args.parallel, args.dry_run);
    let specs = config.service_specs();
    let edges = config.dependencies()?;

    for spec in &specs {
        register_backend(&mut switcher, spec);
    }

    let outcomes = switcher
        .switch_all(&specs, edges, &config.pre_hooks, &config.post_hooks)
        .await?;
    let mut any_failed = false;
    for outcome in &outcomes {
        if outcome.success {
            println!("{}: switched", outcome.service);
        } else {
            any_failed = true;
            let rollback_note = if outcome.rolled_back { " (rolled back)" } else { "" };
            eprintln!("{}: {}{}", outcome.service, outcome.error.clone().unwrap_or_default(), rollback_note);
        }
    }

    if any_failed {
        return Err(gitfleet::GzhError::PartialFailure("one or more services failed to switch".to_string()));
    }
    Ok(())
}

fn register_backend(switcher: &mut EnvironmentSwitcher, spec: &gitfleet::switch::ServiceSpec) {
    use gitfleet::switch::{
        CloudProfileSwitcher, ClusterContextSwitcher, ContainerContextSwitcher, ServiceConfig, SshConfigSwitcher,
    };

    match &spec.config {
        ServiceConfig::CloudProfile { .. } => switcher.register(Arc::new(CloudProfileSwitcher::new(
            spec.name.clone(),
            "aws configure get profile".to_string(),
        ))),
        ServiceConfig::ContainerContext { .. } => {
            switcher.register(Arc::new(ContainerContextSwitcher::new(spec.name.clone())))
        }
        ServiceConfig::ClusterContext { .. } => {
            switcher.register(Arc::new(ClusterContextSwitcher::new(spec.name.clone())))
        }
        ServiceConfig::SshConfig { .. } => {
            let path = dirs_ssh_config();
            switcher.register(Arc::new(SshConfigSwitcher::new(spec.name.clone(), path)));
        }
    }
}

fn dirs_ssh_config() -> std::path::PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".ssh").join("config"))
        .unwrap_or_else(|| std::path::PathBuf::from(".ssh/config"))
}

/// `clean_stale` deletes local directories the provider no longer lists,
/// so it gets one more confirmation beyond the config file's opt-in flag
/// before this run actually removes anything.
fn confirm_stale_cleanup(target: &std::path::Path) -> Option<bool> {
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Some(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(format!(
            "remove directories under {} no longer listed by the provider?",
            target.display()
        ))
        .default(false)
        .interact()
        .ok()
}

fn default_base_url(provider: &str) -> String {
    match provider {
        "github" => "https://github.com".to_string(),
        "gitlab" => "https://gitlab.com".to_string(),
        "gitea" => "https://gitea.com".to_string(),
        other => format!("https://{other}"),
    }
}
