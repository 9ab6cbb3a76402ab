//! Glues provider listing, the repository pool, durable state, and progress
//! into one fleet-wide sync run.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::context::Context;
use crate::error::GzhError;
use crate::job::{CloneStrategy, Job, Operation};
use crate::progress::{ProgressTracker, RenderMode, RepoStatus};
use crate::provider::{ListOptions, Provider};
use crate::repo_pool::{JobRunner, RepositoryPool, RepositoryPoolConfig, TaggedResult};
use crate::state::{CloneState, ReconcileOutcome, RunStatus};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub provider: String,
    pub owner: String,
    pub target: PathBuf,
    pub strategy: CloneStrategy,
    pub pool: RepositoryPoolConfig,
    pub render_mode: RenderMode,
    pub resume: bool,
    /// Remove local directories for repositories no longer reported by the
    /// provider. Opt-in: deleting a developer's working tree by default
    /// would be a surprising (and destructive) side effect of a routine
    /// sync.
    pub clean_stale: bool,
    pub state_save_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            provider: "github".to_string(),
            owner: String::new(),
            target: PathBuf::from("."),
            strategy: CloneStrategy::Pull,
            pool: RepositoryPoolConfig::default(),
            render_mode: RenderMode::Detailed,
            resume: true,
            clean_stale: false,
            state_save_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

pub struct SyncOrchestrator {
    provider: Arc<dyn Provider>,
}

impl SyncOrchestrator {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Runs the full algorithm:
    /// 1. List repositories from the provider.
    /// 2. Load or create durable state, reconciling it against this run.
    /// 3. Optionally remove directories for repositories no longer listed.
    /// 4. Build a job per repository (`Clone` if missing locally, else the
    ///    operation implied by `strategy`).
    /// 5. Submit every job to the Repository Pool.
    /// 6. Drain results, updating progress and state as they arrive.
    /// 7. Persist state periodically and on completion.
    /// 8. Stop the pool.
    /// 9. Return a summary.
    pub async fn run(
        &self,
        ctx: &Context,
        opts: SyncOptions,
        runner: JobRunner,
    ) -> Result<SyncSummary, crate::error::GzhError> {
        let mut rx = self.provider.list_repositories(&opts.owner, ListOptions::default()).await?;
        let mut repos = Vec::new();
        while let Some(item) = rx.recv().await {
            repos.push(item?);
        }

        let mut state = if opts.resume && CloneState::has(&opts.target, &opts.provider, &opts.owner) {
            let mut loaded = CloneState::load(&opts.target, &opts.provider, &opts.owner).await?;
            match loaded.reconcile(&opts.target, opts.strategy, opts.pool.clone_concurrency, opts.pool.retry.max_retries)? {
                ReconcileOutcome::Clean => {}
                ReconcileOutcome::AdoptedWithWarning(warnings) => {
                    for warning in warnings {
                        warn!(%warning, "resumed state adopted a differing run configuration");
                    }
                }
            }
            loaded.all_repos = repos.iter().map(|r| r.full_name.clone()).collect();
            loaded.status = RunStatus::Running;
            loaded
        } else {
            CloneState::new(
                opts.provider.clone(),
                opts.owner.clone(),
                opts.target.clone(),
                opts.strategy,
                opts.pool.clone_concurrency,
                opts.pool.retry.max_retries,
                repos.iter().map(|r| r.full_name.clone()).collect(),
            )
        };

        if opts.clean_stale {
            self.clean_stale_directories(&opts.target, &repos).await;
        }

        // A resume retries repositories that failed last time, not just the
        // ones never attempted — `work_remaining` is broader than the
        // durable `pending` bucket on purpose.
        let remaining: HashSet<String> = state.work_remaining().into_iter().collect();
        let jobs: Vec<Job> = repos
            .iter()
            .filter(|r| remaining.contains(&r.full_name))
            .map(|r| {
                let local_path = opts.target.join(&r.full_name);
                let operation = if local_path.is_dir() {
                    Operation::from_strategy(opts.strategy)
                } else {
                    Operation::Clone
                };
                Job::new(r.clone(), operation, local_path, opts.strategy)
            })
            .collect();

        let names: Vec<String> = repos.iter().map(|r| r.full_name.clone()).collect();
        let tracker = Arc::new(ProgressTracker::new(opts.render_mode, &names));
        for entry in &state.completed {
            tracker.update(&entry.name, RepoStatus::Completed);
        }
        for entry in &state.failed {
            tracker.update(&entry.name, RepoStatus::Failed);
        }

        let mut pool = RepositoryPool::new(opts.pool, ctx.clone());
        pool.start();
        for job in &jobs {
            tracker.update(job.name(), status_for(job.operation));
            pool.submit(job.clone(), runner.clone())?;
        }

        let mut failures = Vec::new();
        let mut last_save = tokio::time::Instant::now();
        let mut cancelled = false;

        for _ in 0..jobs.len() {
            let Some(TaggedResult { result, .. }) = pool.recv().await else {
                break;
            };
            let name = result.job.name().to_string();
            let local_path = result.job.local_path.clone();
            let operation = operation_label(result.job.operation);
            if result.success {
                state.add_completed(&name, local_path, operation, result.message.clone());
                tracker.update(&name, RepoStatus::Completed);
                info!(repo = %name, "sync completed");
            } else {
                let message = result.error.clone().unwrap_or_default();
                state.add_failed(&name, local_path, operation, message.clone(), result.attempts);
                tracker.update(&name, RepoStatus::Failed);
                failures.push((name, message));
            }

            if last_save.elapsed() >= opts.state_save_interval {
                state.save().await?;
                last_save = tokio::time::Instant::now();
            }

            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        pool.stop().await?;
        tracker.finish();

        if cancelled {
            state.status = RunStatus::Cancelled;
            state.save().await?;
            return Err(ctx.err().unwrap_or(GzhError::Cancelled));
        }

        let failed = state.failed.len();
        if failed == 0 {
            state.status = RunStatus::Completed;
            state.save().await?;
            CloneState::delete(&opts.target, &opts.provider, &opts.owner).await?;
        } else {
            state.status = RunStatus::Failed;
            state.save().await?;
        }

        Ok(SyncSummary {
            total: repos.len(),
            completed: state.completed.len(),
            failed,
            failures,
        })
    }

    async fn clean_stale_directories(
        &self,
        target: &std::path::Path,
        repos: &[crate::job::RepositoryDescriptor],
    ) {
        let known: HashSet<&str> = repos.iter().map(|r| r.full_name.as_str()).collect();
        let Ok(mut entries) = tokio::fs::read_dir(target).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || known.contains(name.as_ref()) {
                continue;
            }
            warn!(dir = %name, "removing stale directory no longer listed by provider");
            let _ = tokio::fs::remove_dir_all(entry.path()).await;
        }
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Clone => "clone",
        Operation::Pull => "pull",
        Operation::Fetch => "fetch",
        Operation::Reset => "reset",
        Operation::Config => "config",
    }
}

fn status_for(operation: Operation) -> RepoStatus {
    match operation {
        Operation::Clone => RepoStatus::Cloning,
        Operation::Pull => RepoStatus::Pulling,
        Operation::Fetch => RepoStatus::Fetching,
        Operation::Reset => RepoStatus::Resetting,
        Operation::Config => RepoStatus::Cloning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GzhError;
    use crate::job::RepositoryDescriptor;
    use crate::provider::{CapabilitySet, CloneOptions, Credentials, HealthReport, HealthState, TokenValidation};
    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    struct FakeProvider {
        repos: Vec<RepositoryDescriptor>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::new()
        }
        fn base_url(&self) -> &str {
            "https://example.invalid"
        }
        async fn authenticate(&mut self, _creds: Credentials) -> Result<(), GzhError> {
            Ok(())
        }
        async fn validate_token(&self) -> Result<TokenValidation, GzhError> {
            Ok(TokenValidation::default())
        }
        async fn list_repositories(
            &self,
            _owner: &str,
            _opts: crate::provider::ListOptions,
        ) -> Result<mpsc::Receiver<Result<RepositoryDescriptor, GzhError>>, GzhError> {
            let (tx, rx) = mpsc::channel(16);
            let repos = self.repos.clone();
            tokio::spawn(async move {
                for repo in repos {
                    let _ = tx.send(Ok(repo)).await;
                }
            });
            Ok(rx)
        }
        async fn get_repository(&self, _full_name: &str) -> Result<RepositoryDescriptor, GzhError> {
            unimplemented!()
        }
        async fn clone_repository(
            &self,
            _repo: &RepositoryDescriptor,
            _target: &std::path::Path,
            _opts: CloneOptions,
        ) -> Result<(), GzhError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<HealthReport, GzhError> {
            Ok(HealthReport {
                status: HealthState::Healthy,
                latency: Duration::ZERO,
                detail: String::new(),
            })
        }
        async fn get_rate_limit(&self) -> Option<crate::provider::RateLimit> {
            None
        }
    }

    fn repo(full_name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: full_name.to_string(),
            name: full_name.to_string(),
            full_name: full_name.to_string(),
            default_branch: "main".to_string(),
            clone_url_https: format!("https://example.com/{full_name}.git"),
            clone_url_ssh: format!("git@example.com:{full_name}.git"),
            html_url: format!("https://example.com/{full_name}"),
            provider: "fake".to_string(),
        }
    }

    #[tokio::test]
    async fn full_sync_completes_every_repo_and_persists_state() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider {
            repos: vec![repo("acme/one"), repo("acme/two")],
        });
        let orchestrator = SyncOrchestrator::new(provider);

        let runner: JobRunner = Arc::new(|_job, _ctx| Box::pin(async { Ok("ok".to_string()) }));
        let opts = SyncOptions {
            provider: "fake".to_string(),
            owner: "acme".to_string(),
            target: dir.path().to_path_buf(),
            render_mode: RenderMode::Quiet,
            pool: RepositoryPoolConfig {
                clone_concurrency: 2,
                update_concurrency: 2,
                config_concurrency: 1,
                buffer_size: 16,
                job_timeout: Duration::from_secs(5),
                retry: crate::repo_pool::RetryConfig {
                    max_retries: 0,
                    retry_delay: Duration::from_millis(1),
                },
            },
            ..SyncOptions::default()
        };

        let ctx = Context::new();
        let summary = orchestrator.run(&ctx, opts, runner).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.failures.is_empty());

        assert!(!CloneState::has(dir.path(), "fake", "acme"));
    }

    #[tokio::test]
    async fn resumed_run_skips_already_completed_repos() {
        let dir = tempdir().unwrap();
        let mut state = CloneState::new(
            "fake",
            "acme",
            dir.path().to_path_buf(),
            CloneStrategy::Pull,
            2,
            0,
            vec!["acme/one".to_string(), "acme/two".to_string()],
        );
        state.add_completed("acme/one", dir.path().join("acme/one"), "pull", "pulled");
        state.save().await.unwrap();

        let provider = Arc::new(FakeProvider {
            repos: vec![repo("acme/one"), repo("acme/two")],
        });
        let orchestrator = SyncOrchestrator::new(provider);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let runner: JobRunner = Arc::new(move |job, _ctx| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(job.name().to_string());
                Ok("ok".to_string())
            })
        });

        let opts = SyncOptions {
            provider: "fake".to_string(),
            owner: "acme".to_string(),
            target: dir.path().to_path_buf(),
            render_mode: RenderMode::Quiet,
            pool: RepositoryPoolConfig {
                clone_concurrency: 2,
                update_concurrency: 2,
                config_concurrency: 1,
                buffer_size: 16,
                job_timeout: Duration::from_secs(5),
                retry: crate::repo_pool::RetryConfig {
                    max_retries: 0,
                    retry_delay: Duration::from_millis(1),
                },
            },
            ..SyncOptions::default()
        };

        let ctx = Context::new();
        orchestrator.run(&ctx, opts, runner).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["acme/two"]);
    }
}
