//! Dependency-ordered switching across heterogeneous service backends.

mod backends;

pub use backends::{CloudProfileSwitcher, ClusterContextSwitcher, ContainerContextSwitcher, SshConfigSwitcher};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::dependency::{DependencyResolver, Edge};
use crate::error::GzhError;

/// Tagged union of backend shapes a service switch can target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceConfig {
    CloudProfile { profile: String, region: Option<String> },
    ContainerContext { context: String },
    ClusterContext { context: String, namespace: Option<String> },
    SshConfig { host: String, user: String, identity_file: Option<String> },
}

/// What to do when a post-switch hook fails: recorded either way, but never
/// fatal and never itself a rollback trigger — only a pre-switch hook or the
/// `switch()` call failing can do that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnHookError {
    Continue,
    Fail,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub command: String,
    pub timeout: Option<std::time::Duration>,
    pub on_error: OnHookError,
}

/// One named service's switch target. Hooks are environment-level (see
/// [`EnvironmentSwitcher::switch_all`]), not attached per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub config: ServiceConfig,
}

/// Implemented once per backend kind (cloud profile, container context,
/// cluster context, SSH config) — parity across backends comes from all of
/// them satisfying this one trait, not from a shared base implementation.
#[async_trait]
pub trait ServiceSwitcher: Send + Sync {
    fn name(&self) -> &str;

    async fn switch(&self, config: &ServiceConfig) -> Result<(), GzhError>;

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError>;

    async fn rollback(&self, previous: &ServiceConfig) -> Result<(), GzhError>;
}

#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub service: String,
    pub success: bool,
    pub error: Option<String>,
    pub rolled_back: bool,
}

pub struct EnvironmentSwitcher {
    switchers: HashMap<String, Arc<dyn ServiceSwitcher>>,
    rollback_on_error: bool,
    parallel: bool,
    dry_run: bool,
}

impl EnvironmentSwitcher {
    pub fn new(rollback_on_error: bool, parallel: bool, dry_run: bool) -> Self {
        Self {
            switchers: HashMap::new(),
            rollback_on_error,
            parallel,
            dry_run,
        }
    }

    pub fn register(&mut self, switcher: Arc<dyn ServiceSwitcher>) {
        self.switchers.insert(switcher.name().to_string(), switcher);
    }

    /// Switches every service named in `specs`, honoring the dependency
    /// order from `edges`: services within one `ServiceGroup` switch
    /// concurrently when `parallel` is set and the group has more than one
    /// member, sequentially otherwise; groups run strictly in sequence.
    ///
    /// `pre_hooks` run once, in order, before any service switches. A hook
    /// with `on_error: continue` logs and is skipped past; any other
    /// `on_error` aborts the whole run before a single service is touched.
    /// `post_hooks` run once, in order, after every service has switched
    /// successfully — their failure is logged but never triggers a
    /// rollback.
    ///
    /// On a switch failure with `rollback_on_error = true`, every service
    /// already switched in this run (not ones from a prior run) is rolled
    /// back to its pre-switch state, in reverse dependency order; services
    /// at or after the failed one in the schedule are never touched.
    pub async fn switch_all(
        &self,
        specs: &[ServiceSpec],
        edges: Vec<Edge>,
        pre_hooks: &[HookConfig],
        post_hooks: &[HookConfig],
    ) -> Result<Vec<SwitchOutcome>, GzhError> {
        for hook in pre_hooks {
            if let Err(err) = run_hook(hook).await {
                match hook.on_error {
                    OnHookError::Continue => {
                        warn!(error = %err, "pre-hook failed, continuing");
                    }
                    OnHookError::Fail | OnHookError::Rollback => {
                        error!(error = %err, "pre-hook failed, aborting before any service switches");
                        return Err(GzhError::Network(format!("pre-hook aborted the run: {err}")));
                    }
                }
            }
        }

        let services: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let resolver = DependencyResolver::new(services, edges);
        let groups = resolver.resolve()?;

        let by_name: HashMap<&str, &ServiceSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut outcomes = Vec::new();
        let mut previous_states: Vec<(String, ServiceConfig)> = Vec::new();
        let mut failed = false;

        'levels: for group in groups {
            let mut level_futures = Vec::new();
            for name in &group.services {
                let Some(spec) = by_name.get(name.as_str()) else {
                    continue;
                };
                level_futures.push(self.switch_one(spec));
            }

            let results = if self.parallel && level_futures.len() > 1 {
                futures::future::join_all(level_futures).await
            } else {
                let mut results = Vec::with_capacity(level_futures.len());
                for fut in level_futures {
                    results.push(fut.await);
                }
                results
            };

            for (outcome, captured_state) in results {
                if outcome.success {
                    if let Some(state) = captured_state {
                        previous_states.push((outcome.service.clone(), state));
                    }
                } else {
                    failed = true;
                }
                outcomes.push(outcome);
            }

            if failed {
                break 'levels;
            }
        }

        if failed && self.rollback_on_error {
            for (name, previous) in previous_states.into_iter().rev() {
                let Some(switcher) = self.switchers.get(&name) else {
                    continue;
                };
                match switcher.rollback(&previous).await {
                    Ok(()) => {
                        info!(service = %name, "rolled back after failure elsewhere in the run");
                        if let Some(entry) = outcomes.iter_mut().find(|o| o.service == name) {
                            entry.rolled_back = true;
                        }
                    }
                    Err(err) => {
                        error!(service = %name, error = %err, "rollback itself failed");
                    }
                }
            }
        }

        if !failed {
            for hook in post_hooks {
                if let Err(err) = run_hook(hook).await {
                    match hook.on_error {
                        OnHookError::Continue => warn!(error = %err, "post-hook failed"),
                        OnHookError::Fail | OnHookError::Rollback => {
                            error!(error = %err, "post-hook failed")
                        }
                    }
                }
            }
        }

        Ok(outcomes)
    }

    async fn switch_one(&self, spec: &ServiceSpec) -> (SwitchOutcome, Option<ServiceConfig>) {
        let Some(switcher) = self.switchers.get(&spec.name) else {
            return (
                SwitchOutcome {
                    service: spec.name.clone(),
                    success: false,
                    error: Some(format!("no switcher registered for {}", spec.name)),
                    rolled_back: false,
                },
                None,
            );
        };

        let previous_state = switcher.get_current_state().await.ok();

        if self.dry_run {
            info!(service = %spec.name, "dry run: skipping switch");
            return (
                SwitchOutcome {
                    service: spec.name.clone(),
                    success: true,
                    error: None,
                    rolled_back: false,
                },
                previous_state,
            );
        }

        if let Err(err) = switcher.switch(&spec.config).await {
            return (
                SwitchOutcome {
                    service: spec.name.clone(),
                    success: false,
                    error: Some(err.to_string()),
                    rolled_back: false,
                },
                None,
            );
        }

        (
            SwitchOutcome {
                service: spec.name.clone(),
                success: true,
                error: None,
                rolled_back: false,
            },
            previous_state,
        )
    }
}

async fn run_hook(hook: &HookConfig) -> Result<(), GzhError> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(&hook.command);
    let run = async {
        cmd.output()
            .await
            .map_err(|e| GzhError::Network(e.to_string()))
    };

    let output = match hook.timeout {
        Some(timeout) => tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| GzhError::Network("hook timed out".to_string()))??,
        None => run.await?,
    };

    if !output.status.success() {
        return Err(GzhError::Network(format!(
            "hook exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSwitcher {
        name: String,
        fail: bool,
        switched: Arc<Mutex<Vec<String>>>,
        rolled_back: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ServiceSwitcher for RecordingSwitcher {
        fn name(&self) -> &str {
            &self.name
        }

        async fn switch(&self, _config: &ServiceConfig) -> Result<(), GzhError> {
            if self.fail {
                return Err(GzhError::Network("switch failed".to_string()));
            }
            self.switched.lock().unwrap().push(self.name.clone());
            Ok(())
        }

        async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
            Ok(ServiceConfig::ContainerContext {
                context: format!("{}-previous", self.name),
            })
        }

        async fn rollback(&self, _previous: &ServiceConfig) -> Result<(), GzhError> {
            self.rolled_back.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            config: ServiceConfig::ContainerContext { context: "next".to_string() },
        }
    }

    #[tokio::test]
    async fn rollback_on_error_undoes_already_switched_services() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));

        let mut env = EnvironmentSwitcher::new(true, false, false);
        env.register(Arc::new(RecordingSwitcher {
            name: "a".into(),
            fail: false,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));
        env.register(Arc::new(RecordingSwitcher {
            name: "b".into(),
            fail: true,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));
        env.register(Arc::new(RecordingSwitcher {
            name: "c".into(),
            fail: false,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));

        let specs = vec![spec("a"), spec("b"), spec("c")];
        let edges = vec![Edge { from: "a".into(), to: "b".into() }, Edge { from: "b".into(), to: "c".into() }];

        let outcomes = env.switch_all(&specs, edges, &[], &[]).await.unwrap();

        assert!(switched.lock().unwrap().contains(&"a".to_string()));
        assert!(!switched.lock().unwrap().contains(&"c".to_string()));
        assert!(rolled_back.lock().unwrap().contains(&"a".to_string()));

        let a_outcome = outcomes.iter().find(|o| o.service == "a").unwrap();
        assert!(a_outcome.rolled_back);
        let b_outcome = outcomes.iter().find(|o| o.service == "b").unwrap();
        assert!(!b_outcome.success);
    }

    #[tokio::test]
    async fn independent_services_in_one_level_switch_concurrently_when_parallel() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));
        let mut env = EnvironmentSwitcher::new(false, true, false);
        for name in ["a", "b"] {
            env.register(Arc::new(RecordingSwitcher {
                name: name.into(),
                fail: false,
                switched: switched.clone(),
                rolled_back: rolled_back.clone(),
            }));
        }

        let specs = vec![spec("a"), spec("b")];
        let outcomes = env.switch_all(&specs, vec![], &[], &[]).await.unwrap();
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(switched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_never_calls_switch() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));
        let mut env = EnvironmentSwitcher::new(false, false, true);
        env.register(Arc::new(RecordingSwitcher {
            name: "a".into(),
            fail: true,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));

        let outcomes = env.switch_all(&[spec("a")], vec![], &[], &[]).await.unwrap();
        assert!(outcomes[0].success);
        assert!(switched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pre_hook_failure_aborts_before_any_service_switches() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));
        let mut env = EnvironmentSwitcher::new(false, false, false);
        env.register(Arc::new(RecordingSwitcher {
            name: "a".into(),
            fail: false,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));

        let pre_hooks = vec![HookConfig {
            command: "exit 1".to_string(),
            timeout: None,
            on_error: OnHookError::Fail,
        }];

        let result = env.switch_all(&[spec("a")], vec![], &pre_hooks, &[]).await;
        assert!(result.is_err());
        assert!(switched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pre_hook_failure_with_continue_lets_the_run_proceed() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));
        let mut env = EnvironmentSwitcher::new(false, false, false);
        env.register(Arc::new(RecordingSwitcher {
            name: "a".into(),
            fail: false,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));

        let pre_hooks = vec![HookConfig {
            command: "exit 1".to_string(),
            timeout: None,
            on_error: OnHookError::Continue,
        }];

        let outcomes = env.switch_all(&[spec("a")], vec![], &pre_hooks, &[]).await.unwrap();
        assert!(outcomes[0].success);
        assert!(switched.lock().unwrap().contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn post_hook_failure_is_logged_but_never_rolls_back() {
        let switched = Arc::new(Mutex::new(Vec::new()));
        let rolled_back = Arc::new(Mutex::new(Vec::new()));
        let mut env = EnvironmentSwitcher::new(true, false, false);
        env.register(Arc::new(RecordingSwitcher {
            name: "a".into(),
            fail: false,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));

        let post_hooks = vec![HookConfig {
            command: "exit 1".to_string(),
            timeout: None,
            on_error: OnHookError::Fail,
        }];

        let outcomes = env.switch_all(&[spec("a")], vec![], &[], &post_hooks).await.unwrap();
        assert!(outcomes[0].success);
        assert!(rolled_back.lock().unwrap().is_empty());
    }
}
