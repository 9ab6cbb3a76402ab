//! Core data model: repository descriptors, jobs, and operation results.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable once returned by a provider. Identity is `(provider, fullName)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub clone_url_https: String,
    pub clone_url_ssh: String,
    pub html_url: String,
    pub provider: String,
}

impl RepositoryDescriptor {
    /// Identity used for dedup/lookups: `(provider, fullName)`.
    pub fn identity(&self) -> (&str, &str) {
        (&self.provider, &self.full_name)
    }
}

/// The reconciliation policy for an already-cloned repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStrategy {
    /// Discard local changes: `reset --hard HEAD` then `pull`.
    Reset,
    /// Merge remote.
    Pull,
    /// Update remote tracking only, working tree untouched.
    Fetch,
}

/// The git operation a job performs. A missing local directory always
/// implies `Clone` regardless of the configured strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Clone,
    Pull,
    Fetch,
    Reset,
    Config,
}

impl Operation {
    /// Maps a reconciliation strategy onto the operation used for an
    /// already-cloned repository.
    pub fn from_strategy(strategy: CloneStrategy) -> Self {
        match strategy {
            CloneStrategy::Reset => Operation::Reset,
            CloneStrategy::Pull => Operation::Pull,
            CloneStrategy::Fetch => Operation::Fetch,
        }
    }

    /// Which of the three Repository Pool lanes this operation routes to.
    pub fn pool_lane(self) -> PoolLane {
        match self {
            Operation::Clone => PoolLane::Clone,
            Operation::Pull | Operation::Fetch | Operation::Reset => PoolLane::Update,
            Operation::Config => PoolLane::Config,
        }
    }
}

/// The three specialized Repository Pool lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolLane {
    Clone,
    Update,
    Config,
}

/// Created by the orchestrator from the provider listing and local tree
/// state; consumed once by a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub repository: RepositoryDescriptor,
    pub operation: Operation,
    pub local_path: PathBuf,
    pub strategy: CloneStrategy,
    pub params: JobParams,
}

/// Free-form per-job parameters; kept separate from the fixed fields above
/// so new operation-specific knobs don't widen `Job` itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobParams {
    pub retry_delay: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl Job {
    pub fn new(
        repository: RepositoryDescriptor,
        operation: Operation,
        local_path: PathBuf,
        strategy: CloneStrategy,
    ) -> Self {
        Self {
            repository,
            operation,
            local_path,
            strategy,
            params: JobParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.repository.full_name
    }
}

/// Drives state updates and progress. Produced once per completed (or
/// exhausted) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub job: Job,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ns: u128,
    pub message: String,
    pub attempts: u32,
}

impl OperationResult {
    pub fn ok(job: Job, duration: Duration, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            job,
            success: true,
            error: None,
            duration_ns: duration.as_nanos(),
            message: message.into(),
            attempts,
        }
    }

    pub fn failed(job: Job, duration: Duration, error: impl Into<String>, attempts: u32) -> Self {
        let error = error.into();
        Self {
            message: error.clone(),
            job,
            success: false,
            error: Some(error),
            duration_ns: duration.as_nanos(),
            attempts,
        }
    }
}
