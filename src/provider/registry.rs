//! Provider registry: maps a provider name to a constructor and exposes
//! capability lookups and bulk health checks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GzhError;
use crate::http::HttpCore;

use super::{CapabilitySet, GiteaProvider, GitHubProvider, GitLabProvider, HealthReport, Provider};

type Factory = Arc<dyn Fn(Arc<HttpCore>, String) -> Box<dyn Provider> + Send + Sync>;

/// Holds a constructor per provider name; `create()` instantiates a fresh,
/// unauthenticated client bound to the given base URL.
pub struct ProviderRegistry {
    factories: HashMap<String, Factory>,
    http: Arc<HttpCore>,
}

impl ProviderRegistry {
    pub fn new(http: Arc<HttpCore>) -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            http,
        };
        registry.register("github", |http, base_url| {
            Box::new(GitHubProvider::new(http, base_url))
        });
        registry.register("gitlab", |http, base_url| {
            Box::new(GitLabProvider::new(http, base_url))
        });
        registry.register("gitea", |http, base_url| {
            Box::new(GiteaProvider::new(http, base_url))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<HttpCore>, String) -> Box<dyn Provider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str, base_url: impl Into<String>) -> Result<Box<dyn Provider>, GzhError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GzhError::ConfigInvalid(format!("unknown provider: {name}")))?;
        Ok(factory(self.http.clone(), base_url.into()))
    }

    /// Capability set a provider advertises before any instance is built —
    /// useful for CLI validation (e.g. rejecting `--groups` against gitea)
    /// without making a network call.
    pub fn capabilities_of(&self, name: &str) -> Result<CapabilitySet, GzhError> {
        let probe = self.create(name, "https://example.invalid")?;
        Ok(probe.capabilities())
    }

    pub fn known_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Health-checks every registered provider against its own base URL,
    /// returning whatever each `health_check()` reports (never an `Err`
    /// for a single provider's failure — that failure is encoded in the
    /// returned `HealthReport` itself).
    pub async fn health_check_all(
        &self,
        base_urls: &HashMap<String, String>,
    ) -> HashMap<String, HealthReport> {
        let mut reports = HashMap::new();
        for name in self.known_providers() {
            let Some(base_url) = base_urls.get(&name) else {
                continue;
            };
            let Ok(provider) = self.create(&name, base_url.clone()) else {
                continue;
            };
            match provider.health_check().await {
                Ok(report) => {
                    reports.insert(name, report);
                }
                Err(err) => {
                    reports.insert(
                        name,
                        HealthReport {
                            status: super::HealthState::Unhealthy,
                            latency: std::time::Duration::ZERO,
                            detail: err.to_string(),
                        },
                    );
                }
            }
        }
        reports
    }
}
