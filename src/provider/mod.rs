//! The protocol layer fronting heterogeneous hosting platforms behind one
//! contract.

mod gitea;
mod github;
mod gitlab;
mod registry;

pub use gitea::GiteaProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use registry::ProviderRegistry;

use std::collections::HashSet;
use std::time::SystemTime;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::GzhError;
use crate::job::RepositoryDescriptor;

/// A named feature a provider may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Repositories,
    Webhooks,
    Releases,
    Groups,
}

pub type CapabilitySet = HashSet<Capability>;

/// Tagged union of credential shapes; each variant encodes its own header
/// shape.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(String),
    UserPass { username: String, password: String },
    SshKey { path: std::path::PathBuf, passphrase: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct TokenValidation {
    pub valid: bool,
    pub scopes: Vec<String>,
    pub user: Option<String>,
    pub rate_limit: Option<RateLimit>,
}

/// `{remaining, reset, limit}`, updated from provider response headers.
/// Shared per (provider, baseURL).
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub remaining: u32,
    pub reset: SystemTime,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthState,
    pub latency: std::time::Duration,
    pub detail: String,
}

/// Options controlling a repository listing call.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub per_page: Option<u32>,
    /// Soft memory cap, in descriptor count, before the listing stream
    /// yields control between pages.
    pub buffer_cap: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub depth: Option<u32>,
}

/// The unified contract every hosting-platform client satisfies.
///
/// Every Provider owns one pooled HTTP client and one
/// rate-limit snapshot; neither is reconstructed per call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet;

    fn base_url(&self) -> &str;

    async fn authenticate(&mut self, creds: Credentials) -> Result<(), GzhError>;

    async fn validate_token(&self) -> Result<TokenValidation, GzhError>;

    /// Produces a lazy, finite stream of repository descriptors for the
    /// given owner (org/group/user). Paginates until the server signals no
    /// next page.
    async fn list_repositories(
        &self,
        owner: &str,
        opts: ListOptions,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<RepositoryDescriptor, GzhError>>, GzhError>;

    async fn get_repository(
        &self,
        full_name: &str,
    ) -> Result<RepositoryDescriptor, GzhError>;

    async fn clone_repository(
        &self,
        repo: &RepositoryDescriptor,
        target: &std::path::Path,
        opts: CloneOptions,
    ) -> Result<(), GzhError>;

    async fn health_check(&self) -> Result<HealthReport, GzhError>;

    async fn get_rate_limit(&self) -> Option<RateLimit>;
}

/// Builds the platform-specific guidance URL surfaced on auth failure.
pub(crate) fn token_guidance_url(provider: &str, base_url: &str) -> String {
    match provider {
        "github" => format!("{base_url}/settings/tokens/new?scopes=repo,read:org"),
        "gitlab" => format!("{base_url}/-/user_settings/personal_access_tokens"),
        "gitea" => format!("{base_url}/user/settings/applications"),
        _ => format!("{base_url}/settings/tokens"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guidance_url_is_platform_specific() {
        assert!(token_guidance_url("github", "https://github.com").contains("settings/tokens"));
        assert!(token_guidance_url("gitlab", "https://gitlab.com").contains("personal_access_tokens"));
        assert!(token_guidance_url("gitea", "https://gitea.example.com").contains("applications"));
    }

    #[tokio::test]
    async fn mocked_provider_reports_health_without_a_real_backend() {
        let mut mock = MockProvider::new();
        mock.expect_health_check().returning(|| {
            Ok(HealthReport {
                status: HealthState::Healthy,
                latency: std::time::Duration::from_millis(5),
                detail: "ok".to_string(),
            })
        });

        let report = mock.health_check().await.unwrap();
        assert_eq!(report.status, HealthState::Healthy);
    }
}
