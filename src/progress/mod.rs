//! Per-repository status and the aggregate progress render.
//!
//! A repository that completes before its bar was ever drawn is folded
//! straight into the aggregate line instead of flashing on screen for one
//! frame.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// One repository's lifecycle: `Queued -> {Cloning|Pulling|Fetching|Resetting}
/// -> {Completed|Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    Queued,
    Cloning,
    Pulling,
    Fetching,
    Resetting,
    Completed,
    Failed,
}

impl RepoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RepoStatus::Completed | RepoStatus::Failed)
    }

    fn label(self) -> &'static str {
        match self {
            RepoStatus::Queued => "queued",
            RepoStatus::Cloning => "cloning",
            RepoStatus::Pulling => "pulling",
            RepoStatus::Fetching => "fetching",
            RepoStatus::Resetting => "resetting",
            RepoStatus::Completed => "completed",
            RepoStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One aggregate line only.
    Compact,
    /// One bar per in-flight repository plus the aggregate line.
    Detailed,
    /// No output at all; the tracker still records state for callers that
    /// poll `snapshot()`.
    Quiet,
}

/// `{total, started, completed, failed, eta}`, recomputed from the tracked
/// statuses on every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub total: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Aggregate {
    /// Linear projection from the elapsed time and the finished-so-far rate;
    /// `None` until at least one repository has finished.
    pub fn eta(&self, elapsed: Duration) -> Option<Duration> {
        let finished = self.completed + self.failed;
        if finished == 0 || finished >= self.total {
            return None;
        }
        let remaining = self.total - finished;
        let per_item = elapsed.as_secs_f64() / finished as f64;
        Some(Duration::from_secs_f64(per_item * remaining as f64))
    }
}

struct RepoBarState {
    status: RepoStatus,
    bar: Option<ProgressBar>,
}

pub struct ProgressTracker {
    mode: RenderMode,
    multi: Option<MultiProgress>,
    aggregate_bar: Option<ProgressBar>,
    repos: Mutex<HashMap<String, RepoBarState>>,
    started_at: Instant,
    total: usize,
}

impl ProgressTracker {
    pub fn new(mode: RenderMode, repo_names: &[String]) -> Self {
        let total = repo_names.len();
        let (multi, aggregate_bar) = match mode {
            RenderMode::Quiet => (None, None),
            _ => {
                let multi = MultiProgress::new();
                let bar = multi.add(ProgressBar::new(total as u64));
                bar.set_style(
                    ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                (Some(multi), Some(bar))
            }
        };

        let repos = repo_names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    RepoBarState {
                        status: RepoStatus::Queued,
                        bar: None,
                    },
                )
            })
            .collect();

        Self {
            mode,
            multi,
            aggregate_bar,
            repos: Mutex::new(repos),
            started_at: Instant::now(),
            total,
        }
    }

    /// Transitions `repo` to `status`, lazily creating its bar in `Detailed`
    /// mode and reaping it (without ever letting it flash) on the first
    /// terminal transition if it was never shown.
    pub fn update(&self, repo: &str, status: RepoStatus) {
        let mut repos = self.repos.lock().expect("progress map lock poisoned");
        let entry = repos.entry(repo.to_string()).or_insert(RepoBarState {
            status: RepoStatus::Queued,
            bar: None,
        });
        entry.status = status;

        if self.mode == RenderMode::Detailed {
            if let Some(multi) = &self.multi {
                if status.is_terminal() {
                    if let Some(bar) = entry.bar.take() {
                        bar.finish_and_clear();
                    }
                } else if entry.bar.is_none() {
                    let bar = multi.add(ProgressBar::new_spinner());
                    bar.set_message(format!("{repo}: {}", status.label()));
                    entry.bar = Some(bar);
                } else if let Some(bar) = &entry.bar {
                    bar.set_message(format!("{repo}: {}", status.label()));
                }
            }
        }

        drop(repos);
        self.render_aggregate();
    }

    fn render_aggregate(&self) {
        let Some(bar) = &self.aggregate_bar else {
            return;
        };
        let aggregate = self.snapshot();
        bar.set_position((aggregate.completed + aggregate.failed) as u64);
        let failed_part = if aggregate.failed > 0 {
            format!(", {}", style(format!("{} failed", aggregate.failed)).red())
        } else {
            String::new()
        };
        bar.set_message(format!(
            "{} completed{failed_part}",
            style(aggregate.completed).green()
        ));
    }

    pub fn snapshot(&self) -> Aggregate {
        let repos = self.repos.lock().expect("progress map lock poisoned");
        let mut started = 0;
        let mut completed = 0;
        let mut failed = 0;
        for state in repos.values() {
            match state.status {
                RepoStatus::Queued => {}
                RepoStatus::Completed => completed += 1,
                RepoStatus::Failed => failed += 1,
                _ => started += 1,
            }
        }
        Aggregate {
            total: self.total,
            started,
            completed,
            failed,
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        self.snapshot().eta(self.started_at.elapsed())
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.aggregate_bar {
            bar.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("repo-{i}")).collect()
    }

    #[test]
    fn snapshot_counts_each_bucket() {
        let tracker = ProgressTracker::new(RenderMode::Quiet, &names(3));
        tracker.update("repo-0", RepoStatus::Completed);
        tracker.update("repo-1", RepoStatus::Failed);
        tracker.update("repo-2", RepoStatus::Cloning);

        let aggregate = tracker.snapshot();
        assert_eq!(aggregate.total, 3);
        assert_eq!(aggregate.completed, 1);
        assert_eq!(aggregate.failed, 1);
        assert_eq!(aggregate.started, 1);
    }

    #[test]
    fn eta_is_none_until_something_finishes() {
        let aggregate = Aggregate {
            total: 10,
            started: 3,
            completed: 0,
            failed: 0,
        };
        assert!(aggregate.eta(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn eta_projects_linearly_from_finished_rate() {
        let aggregate = Aggregate {
            total: 10,
            started: 0,
            completed: 5,
            failed: 0,
        };
        let eta = aggregate.eta(Duration::from_secs(10)).unwrap();
        assert_eq!(eta, Duration::from_secs(10));
    }

    #[test]
    fn detailed_mode_clears_bar_on_terminal_transition() {
        let tracker = ProgressTracker::new(RenderMode::Detailed, &names(1));
        tracker.update("repo-0", RepoStatus::Cloning);
        {
            let repos = tracker.repos.lock().unwrap();
            assert!(repos.get("repo-0").unwrap().bar.is_some());
        }
        tracker.update("repo-0", RepoStatus::Completed);
        let repos = tracker.repos.lock().unwrap();
        assert!(repos.get("repo-0").unwrap().bar.is_none());
    }
}
