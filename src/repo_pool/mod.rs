//! Three specialized pools (clone / update / config) with retry
//! classification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::debug;

use crate::context::Context;
use crate::error::{is_retryable_message, GzhError};
use crate::job::{Job, OperationResult, PoolLane};
use crate::worker::{JobOutcome, WorkerPool, WorkerPoolConfig};

/// Executes a single job's git operation and returns a one-line success
/// message or an error. Supplied by the caller (the Sync Orchestrator)
/// so the pool stays agnostic of *how* a clone/pull/fetch/reset/config is
/// performed.
pub type JobRunner = Arc<dyn Fn(Job, Context) -> BoxFuture<'static, Result<String, GzhError>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepositoryPoolConfig {
    pub clone_concurrency: usize,
    pub update_concurrency: usize,
    pub config_concurrency: usize,
    pub buffer_size: usize,
    pub job_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RepositoryPoolConfig {
    fn default() -> Self {
        Self {
            clone_concurrency: 10,
            update_concurrency: 15,
            config_concurrency: 4,
            buffer_size: 256,
            job_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
        }
    }
}

/// A result tagged with the lane that produced it, for diagnostics.
#[derive(Debug, Clone)]
pub struct TaggedResult {
    pub lane: PoolLane,
    pub result: OperationResult,
}

pub struct RepositoryPool {
    clone_pool: WorkerPool<Job, OperationResult>,
    update_pool: WorkerPool<Job, OperationResult>,
    config_pool: WorkerPool<Job, OperationResult>,
    retry: RetryConfig,
}

impl RepositoryPool {
    pub fn new(config: RepositoryPoolConfig, parent_ctx: Context) -> Self {
        let make = |count: usize| {
            WorkerPool::new(
                WorkerPoolConfig {
                    worker_count: count,
                    buffer_size: config.buffer_size,
                    timeout: config.job_timeout,
                },
                parent_ctx.clone(),
            )
        };

        Self {
            clone_pool: make(config.clone_concurrency),
            update_pool: make(config.update_concurrency),
            config_pool: make(config.config_concurrency),
            retry: config.retry,
        }
    }

    pub fn start(&mut self) {
        self.clone_pool.start();
        self.update_pool.start();
        self.config_pool.start();
    }

    /// Routes `Clone -> clone`, `{Pull,Fetch,Reset} -> update`,
    /// `Config -> config`.
    pub fn submit(&self, job: Job, runner: JobRunner) -> Result<(), GzhError> {
        let retry = self.retry;
        let pool = match job.operation.pool_lane() {
            PoolLane::Clone => &self.clone_pool,
            PoolLane::Update => &self.update_pool,
            PoolLane::Config => &self.config_pool,
        };

        pool.submit(job, move |job, ctx| {
            let runner = runner.clone();
            async move { run_with_retries(job, &ctx, retry, runner).await }
        })
    }

    /// Pulls the next completed result from whichever lane has one ready,
    /// merging all three onto one logical output.
    pub async fn recv(&mut self) -> Option<TaggedResult> {
        tokio::select! {
            Some(outcome) = self.clone_pool.outputs().recv() => Some(tag(PoolLane::Clone, outcome)),
            Some(outcome) = self.update_pool.outputs().recv() => Some(tag(PoolLane::Update, outcome)),
            Some(outcome) = self.config_pool.outputs().recv() => Some(tag(PoolLane::Config, outcome)),
            else => None,
        }
    }

    pub async fn stop(self) -> Result<(), GzhError> {
        self.clone_pool.stop().await?;
        self.update_pool.stop().await?;
        self.config_pool.stop().await?;
        Ok(())
    }
}

fn tag(lane: PoolLane, outcome: JobOutcome<Job, OperationResult>) -> TaggedResult {
    TaggedResult {
        lane,
        result: outcome.result,
    }
}

/// `maxAttempts = maxRetries+1`; non-retryable errors fail fast; a success
/// after >=1 retry surfaces a one-line recovery message; final failure
/// reports `"repository X failed after N attempts: <lastErr>"`.
async fn run_with_retries(
    job: Job,
    ctx: &Context,
    retry: RetryConfig,
    runner: JobRunner,
) -> OperationResult {
    let max_attempts = retry.max_retries + 1;
    let started = Instant::now();
    let mut last_err = String::new();

    for attempt in 1..=max_attempts {
        if ctx.is_cancelled() {
            return OperationResult::failed(job, started.elapsed(), "cancelled", attempt);
        }

        match runner(job.clone(), ctx.clone()).await {
            Ok(message) => {
                let message = if attempt > 1 {
                    format!("recovered after {attempt} attempts: {message}")
                } else {
                    message
                };
                return OperationResult::ok(job, started.elapsed(), message, attempt);
            }
            Err(err) => {
                let text = err.to_string();
                if !is_retryable_message(&text) || attempt == max_attempts {
                    last_err = text;
                    break;
                }
                debug!(job = %job.name(), attempt, error = %text, "retrying after error");
                last_err = text;
                if ctx.run(tokio::time::sleep(retry.retry_delay)).await.is_err() {
                    last_err = "cancelled".to_string();
                    break;
                }
            }
        }
    }

    let name = job.name().to_string();
    debug!(job = %name, attempts = max_attempts, error = %last_err, "job failed after all retries");
    OperationResult::failed(
        job,
        started.elapsed(),
        format!("repository {name} failed after {max_attempts} attempts: {last_err}"),
        max_attempts,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CloneStrategy, Operation, RepositoryDescriptor};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn repo() -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: "1".into(),
            name: "repo".into(),
            full_name: "acme/repo".into(),
            default_branch: "main".into(),
            clone_url_https: "https://example.com/acme/repo.git".into(),
            clone_url_ssh: "git@example.com:acme/repo.git".into(),
            html_url: "https://example.com/acme/repo".into(),
            provider: "github".into(),
        }
    }

    fn job(op: Operation) -> Job {
        Job::new(repo(), op, PathBuf::from("/tmp/acme/repo"), CloneStrategy::Pull)
    }

    #[tokio::test]
    async fn retries_retryable_error_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let runner: JobRunner = Arc::new(move |_job, _ctx| {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    Err(GzhError::Network("connection reset".into()))
                } else {
                    Ok("cloned".to_string())
                }
            })
        });

        let ctx = Context::new();
        let retry = RetryConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        };
        let result = run_with_retries(job(Operation::Clone), &ctx, retry, runner).await;
        assert!(result.success);
        assert!(result.message.contains("recovered after 2 attempts"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let runner: JobRunner = Arc::new(move |_job, _ctx| {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GzhError::InvalidCommand("fatal: not a git repository".into()))
            })
        });

        let ctx = Context::new();
        let result = run_with_retries(job(Operation::Pull), &ctx, RetryConfig::default(), runner).await;
        assert!(!result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let runner: JobRunner = Arc::new(|_job, _ctx| {
            Box::pin(async { Err(GzhError::Network("timeout".into())) })
        });

        let ctx = Context::new();
        let retry = RetryConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        };
        let result = run_with_retries(job(Operation::Fetch), &ctx, retry, runner).await;
        assert!(!result.success);
        assert!(result
            .message
            .contains("repository acme/repo failed after 3 attempts"));
    }

    #[tokio::test]
    async fn results_merge_onto_one_output_tagged_by_lane() {
        let mut pool = RepositoryPool::new(
            RepositoryPoolConfig {
                clone_concurrency: 1,
                update_concurrency: 1,
                config_concurrency: 1,
                buffer_size: 8,
                job_timeout: Duration::from_secs(5),
                retry: RetryConfig {
                    max_retries: 0,
                    retry_delay: Duration::from_millis(1),
                },
            },
            Context::new(),
        );
        pool.start();

        let runner: JobRunner = Arc::new(|_job, _ctx| Box::pin(async { Ok("done".to_string()) }));
        pool.submit(job(Operation::Clone), runner.clone()).unwrap();
        pool.submit(job(Operation::Pull), runner.clone()).unwrap();
        pool.submit(job(Operation::Config), runner).unwrap();

        let mut lanes_seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let tagged = pool.recv().await.unwrap();
            assert!(tagged.result.success);
            lanes_seen.insert(format!("{:?}", tagged.lane));
        }
        assert_eq!(lanes_seen.len(), 3);

        pool.stop().await.unwrap();
    }
}
