//! YAML-backed configuration for both the sync engine and the environment
//! switcher, plus provider token resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dependency::{parse_dependency, Edge};
use crate::error::GzhError;
use crate::job::CloneStrategy;
use crate::switch::{ServiceConfig, ServiceSpec};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub provider: String,
    pub owner: String,
    pub target: PathBuf,
    #[serde(default = "default_strategy")]
    pub strategy: CloneStrategy,
    #[serde(default)]
    pub clean_stale: bool,
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ProviderConfig>,
}

fn default_strategy() -> CloneStrategy {
    CloneStrategy::Pull
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawServiceSpec {
    pub name: String,
    #[serde(flatten)]
    pub config: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub services: Vec<RawServiceSpec>,
    /// Raw `"a -> b"` strings as authored; parsed once via
    /// [`EnvironmentConfig::dependencies`].
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub rollback_on_error: bool,
    /// Run once, in order, before any service switches. A hook with
    /// `on_error: continue` suppresses its own failure; anything else
    /// aborts the whole run before a single service is touched.
    #[serde(default)]
    pub pre_hooks: Vec<crate::switch::HookConfig>,
    /// Run once, in order, after every service has switched successfully.
    /// A failure here is logged but never rolls back completed switches.
    #[serde(default)]
    pub post_hooks: Vec<crate::switch::HookConfig>,
}

impl EnvironmentConfig {
    pub fn service_specs(&self) -> Vec<ServiceSpec> {
        self.services
            .iter()
            .map(|raw| ServiceSpec {
                name: raw.name.clone(),
                config: raw.config.clone(),
            })
            .collect()
    }

    pub fn dependencies(&self) -> Result<Vec<Edge>, GzhError> {
        self.dependencies.iter().map(|raw| parse_dependency(raw)).collect()
    }
}

/// Env var names consulted for provider tokens, in the precedence order the
/// CLI applies: a token passed programmatically beats one resolved from
/// these variables, which in turn beats no token at all.
pub fn token_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "github" => Some("GITHUB_TOKEN"),
        "gitlab" => Some("GITLAB_TOKEN"),
        "gitea" => Some("GITEA_TOKEN"),
        _ => None,
    }
}

/// Resolves a provider token: explicit argument, then the matching env var,
/// then `None`.
pub fn resolve_token(provider: &str, explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| token_env_var(provider).and_then(|var| std::env::var(var).ok()))
}

pub async fn load_sync_config(path: &Path) -> Result<SyncConfig, GzhError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| GzhError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
    serde_yaml::from_slice(&bytes)
        .map_err(|e| GzhError::ConfigInvalid(format!("parsing {}: {e}", path.display())))
}

pub async fn load_environment_config(path: &Path) -> Result<EnvironmentConfig, GzhError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| GzhError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
    serde_yaml::from_slice(&bytes)
        .map_err(|e| GzhError::ConfigInvalid(format!("parsing {}: {e}", path.display())))
}

/// The per-user config directory (`directories`'s `ProjectDirs`), used for
/// discovering config files when no explicit `--config` path is given.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "gitfleet", "gitfleet")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn token_precedence_prefers_explicit_over_env() {
        std::env::set_var("GITHUB_TOKEN", "from-env");
        let resolved = resolve_token("github", Some("from-arg".to_string()));
        assert_eq!(resolved.as_deref(), Some("from-arg"));
        std::env::remove_var("GITHUB_TOKEN");
    }

    #[test]
    #[serial]
    fn token_falls_back_to_env_var_when_not_explicit() {
        std::env::set_var("GITLAB_TOKEN", "env-token");
        let resolved = resolve_token("gitlab", None);
        assert_eq!(resolved.as_deref(), Some("env-token"));
        std::env::remove_var("GITLAB_TOKEN");
    }

    #[test]
    fn unknown_provider_has_no_env_var() {
        assert_eq!(token_env_var("bitbucket"), None);
    }

    #[test]
    fn sync_config_parses_from_yaml() {
        let yaml = r#"
provider: github
owner: acme
target: /tmp/acme
strategy: reset
clean_stale: true
"#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.owner, "acme");
        assert_eq!(config.strategy, CloneStrategy::Reset);
        assert!(config.clean_stale);
    }

    #[test]
    fn environment_config_dependencies_parse_into_edges() {
        let yaml = r#"
name: production
services:
  - name: database
    kind: cloud_profile
    profile: prod
dependencies:
  - "database -> api"
rollback_on_error: true
"#;
        let config: EnvironmentConfig = serde_yaml::from_str(yaml).unwrap();
        let edges = config.dependencies().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "database");
        assert_eq!(edges[0].to, "api");
    }

    #[test]
    fn environment_config_parses_environment_level_hooks() {
        let yaml = r#"
name: production
description: prod environment switch
services:
  - name: database
    kind: cloud_profile
    profile: prod
pre_hooks:
  - command: "echo starting"
    on_error: fail
post_hooks:
  - command: "echo done"
    on_error: continue
"#;
        let config: EnvironmentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pre_hooks.len(), 1);
        assert_eq!(config.post_hooks.len(), 1);
        assert_eq!(config.description.as_deref(), Some("prod environment switch"));
    }
}
