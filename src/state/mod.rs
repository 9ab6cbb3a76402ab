//! Durable per-(provider, owner) sync state, persisted as JSON so a killed
//! run can resume without re-listing or re-cloning completed repositories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::GzhError;
use crate::job::CloneStrategy;

/// A run's terminal (or in-flight) status, persisted so a reader can tell a
/// cleanly finished run from one that was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One successfully synced repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub name: String,
    pub path: PathBuf,
    pub operation: String,
    pub message: String,
    pub ts: SystemTime,
}

/// One repository whose operation did not succeed this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub name: String,
    pub path: PathBuf,
    pub operation: String,
    pub error: String,
    pub attempts: u32,
    pub ts: SystemTime,
}

/// One state file per `(provider, owner)` pair, at
/// `<target>/.gzh/state/<provider>-<owner>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneState {
    pub provider: String,
    pub owner: String,
    pub target_path: PathBuf,
    pub strategy: CloneStrategy,
    pub parallel: usize,
    pub max_retries: u32,
    pub status: RunStatus,
    pub all_repos: Vec<String>,
    pub completed: Vec<CompletedEntry>,
    pub failed: Vec<FailedEntry>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Outcome of reconciling a loaded state file against the run's current
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Configuration matches; carry on.
    Clean,
    /// A non-identity field differed from this run's request; the request's
    /// value is adopted and the caller should warn.
    AdoptedWithWarning(Vec<String>),
}

impl CloneState {
    pub fn new(
        provider: impl Into<String>,
        owner: impl Into<String>,
        target_path: PathBuf,
        strategy: CloneStrategy,
        parallel: usize,
        max_retries: u32,
        all_repos: Vec<String>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            provider: provider.into(),
            owner: owner.into(),
            target_path,
            strategy,
            parallel,
            max_retries,
            status: RunStatus::Running,
            all_repos,
            completed: Vec::new(),
            failed: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    fn state_dir(target: &Path) -> PathBuf {
        target.join(".gzh").join("state")
    }

    pub fn state_path(target: &Path, provider: &str, owner: &str) -> PathBuf {
        Self::state_dir(target).join(format!("{provider}-{owner}.json"))
    }

    pub fn has(target: &Path, provider: &str, owner: &str) -> bool {
        Self::state_path(target, provider, owner).is_file()
    }

    pub async fn load(target: &Path, provider: &str, owner: &str) -> Result<Self, GzhError> {
        let path = Self::state_path(target, provider, owner);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| GzhError::InternalInvariant(format!("reading {}: {e}", path.display())))?;
        let state: Self = serde_json::from_slice(&bytes)
            .map_err(|e| GzhError::InternalInvariant(format!("parsing {}: {e}", path.display())))?;
        state.check_invariants()?;
        Ok(state)
    }

    pub async fn save(&mut self) -> Result<(), GzhError> {
        self.updated_at = SystemTime::now();
        self.check_invariants()?;
        let dir = Self::state_dir(&self.target_path);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GzhError::InternalInvariant(e.to_string()))?;
        let path = Self::state_path(&self.target_path, &self.provider, &self.owner);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| GzhError::InternalInvariant(e.to_string()))?;
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| GzhError::InternalInvariant(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| GzhError::InternalInvariant(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(target: &Path, provider: &str, owner: &str) -> Result<(), GzhError> {
        let path = Self::state_path(target, provider, owner);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GzhError::InternalInvariant(e.to_string())),
        }
    }

    /// Lists every `(provider, owner)` pair with a state file under `target`.
    pub async fn list(target: &Path) -> Result<Vec<(String, String)>, GzhError> {
        let dir = Self::state_dir(target);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GzhError::InternalInvariant(e.to_string())),
        };

        let mut pairs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GzhError::InternalInvariant(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some((provider, owner)) = stem.split_once('-') {
                pairs.push((provider.to_string(), owner.to_string()));
            }
        }
        Ok(pairs)
    }

    fn completed_names(&self) -> HashSet<&str> {
        self.completed.iter().map(|e| e.name.as_str()).collect()
    }

    fn failed_names(&self) -> HashSet<&str> {
        self.failed.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn add_completed(
        &mut self,
        name: &str,
        path: PathBuf,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.failed.retain(|e| e.name != name);
        self.completed.retain(|e| e.name != name);
        self.completed.push(CompletedEntry {
            name: name.to_string(),
            path,
            operation: operation.into(),
            message: message.into(),
            ts: SystemTime::now(),
        });
    }

    pub fn add_failed(
        &mut self,
        name: &str,
        path: PathBuf,
        operation: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) {
        self.completed.retain(|e| e.name != name);
        self.failed.retain(|e| e.name != name);
        self.failed.push(FailedEntry {
            name: name.to_string(),
            path,
            operation: operation.into(),
            error: error.into(),
            attempts,
            ts: SystemTime::now(),
        });
    }

    /// `pending = allRepos \ (completed ∪ failed)`, recomputed rather than
    /// stored, so it can never drift from the two sets above.
    pub fn pending(&self) -> Vec<String> {
        let completed = self.completed_names();
        let failed = self.failed_names();
        self.all_repos
            .iter()
            .filter(|name| !completed.contains(name.as_str()) && !failed.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// The work set for a resumed run: every repository not yet `completed`,
    /// including ones that failed last time — a resume retries those rather
    /// than leaving them classified as permanently failed.
    pub fn work_remaining(&self) -> Vec<String> {
        let completed = self.completed_names();
        self.all_repos
            .iter()
            .filter(|name| !completed.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// `completed ∩ failed = ∅` must hold at load and after every mutation.
    fn check_invariants(&self) -> Result<(), GzhError> {
        let completed = self.completed_names();
        if self.failed.iter().any(|e| completed.contains(e.name.as_str())) {
            return Err(GzhError::InternalInvariant(
                "completed and failed sets overlap".to_string(),
            ));
        }
        Ok(())
    }

    /// Reconciles a loaded state against the current run's configuration: a
    /// `targetPath` mismatch is a hard failure (the caller should refuse to
    /// resume); other field mismatches adopt this run's requested values,
    /// with a warning, since a resume is a deliberate request to change
    /// course rather than silently keep running the old policy.
    pub fn reconcile(
        &mut self,
        target_path: &Path,
        strategy: CloneStrategy,
        parallel: usize,
        max_retries: u32,
    ) -> Result<ReconcileOutcome, GzhError> {
        if self.target_path != target_path {
            return Err(GzhError::ConfigInvalid(format!(
                "state file targets {} but this run targets {}",
                self.target_path.display(),
                target_path.display()
            )));
        }

        let mut warnings = Vec::new();
        if self.strategy != strategy {
            warnings.push(format!(
                "strategy changed from {:?} to {:?}; adopting {:?}",
                self.strategy, strategy, strategy
            ));
            self.strategy = strategy;
        }
        if self.parallel != parallel {
            warnings.push(format!(
                "parallel changed from {} to {parallel}; adopting {parallel}",
                self.parallel
            ));
            self.parallel = parallel;
        }
        if self.max_retries != max_retries {
            warnings.push(format!(
                "maxRetries changed from {} to {max_retries}; adopting {max_retries}",
                self.max_retries
            ));
            self.max_retries = max_retries;
        }

        if warnings.is_empty() {
            Ok(ReconcileOutcome::Clean)
        } else {
            Ok(ReconcileOutcome::AdoptedWithWarning(warnings))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(target: PathBuf) -> CloneState {
        CloneState::new(
            "github",
            "acme",
            target,
            CloneStrategy::Pull,
            10,
            2,
            vec!["a".into(), "b".into(), "c".into()],
        )
    }

    fn path_for(name: &str) -> PathBuf {
        PathBuf::from("/tmp/acme").join(name)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut state = sample(dir.path().to_path_buf());
        state.add_completed("a", path_for("a"), "pull", "pulled");
        state.add_failed("b", path_for("b"), "pull", "network error", 2);
        state.save().await.unwrap();

        let loaded = CloneState::load(dir.path(), "github", "acme").await.unwrap();
        assert_eq!(loaded.completed_names(), state.completed_names());
        assert_eq!(loaded.failed_names(), state.failed_names());
        assert_eq!(loaded.pending(), vec!["c".to_string()]);
        assert_eq!(loaded.failed[0].attempts, 2);
    }

    #[tokio::test]
    async fn has_reflects_presence_and_delete_removes() {
        let dir = tempdir().unwrap();
        let mut state = sample(dir.path().to_path_buf());
        assert!(!CloneState::has(dir.path(), "github", "acme"));
        state.save().await.unwrap();
        assert!(CloneState::has(dir.path(), "github", "acme"));
        CloneState::delete(dir.path(), "github", "acme").await.unwrap();
        assert!(!CloneState::has(dir.path(), "github", "acme"));
    }

    #[test]
    fn completed_and_failed_are_mutually_exclusive() {
        let mut state = sample(PathBuf::from("/tmp/x"));
        state.add_completed("a", path_for("a"), "pull", "pulled");
        state.add_failed("a", path_for("a"), "pull", "boom", 1);
        assert!(!state.completed_names().contains("a"));
        assert!(state.failed_names().contains("a"));

        state.add_completed("a", path_for("a"), "pull", "pulled");
        assert!(state.completed_names().contains("a"));
        assert!(!state.failed_names().contains("a"));
    }

    #[test]
    fn target_path_mismatch_is_a_hard_failure() {
        let mut state = sample(PathBuf::from("/tmp/x"));
        let result = state.reconcile(Path::new("/tmp/y"), CloneStrategy::Pull, 10, 2);
        assert!(matches!(result, Err(GzhError::ConfigInvalid(_))));
    }

    #[test]
    fn strategy_mismatch_adopts_the_requested_value_with_warning() {
        let mut state = sample(PathBuf::from("/tmp/x"));
        let outcome = state
            .reconcile(Path::new("/tmp/x"), CloneStrategy::Reset, 10, 2)
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::AdoptedWithWarning(_)));
        assert_eq!(state.strategy, CloneStrategy::Reset);
    }

    #[test]
    fn work_remaining_includes_previously_failed_repositories() {
        let mut state = sample(PathBuf::from("/tmp/x"));
        state.add_completed("a", path_for("a"), "pull", "pulled");
        state.add_failed("b", path_for("b"), "pull", "network error", 1);
        let mut remaining = state.work_remaining();
        remaining.sort();
        assert_eq!(remaining, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn list_discovers_every_provider_owner_pair() {
        let dir = tempdir().unwrap();
        sample(dir.path().to_path_buf()).save().await.unwrap();
        let mut other = sample(dir.path().to_path_buf());
        other.owner = "other-org".to_string();
        other.save().await.unwrap();

        let mut pairs = CloneState::list(dir.path()).await.unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("github".to_string(), "acme".to_string()),
                ("github".to_string(), "other-org".to_string()),
            ]
        );
    }
}
