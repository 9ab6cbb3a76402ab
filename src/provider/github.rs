//! GitHub provider: `Link` header pagination, `X-RateLimit-*` headers.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::GzhError;
use crate::git::GitExecutor;
use crate::job::RepositoryDescriptor;

use super::{
    token_guidance_url, Capability, CapabilitySet, CloneOptions, Credentials, HealthReport,
    HealthState, ListOptions, Provider, RateLimit, TokenValidation,
};
use crate::cache::{Cache, CacheKey};
use crate::http::{HttpCore, RateLimitTracker};

/// Below this many remaining requests, pause until the window resets rather
/// than spend the last few on a listing that is about to 429.
const RATE_LIMIT_BUFFER: u32 = 50;

const REPOSITORY_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct GhRepo {
    id: u64,
    name: String,
    full_name: String,
    default_branch: String,
    clone_url: String,
    ssh_url: String,
    html_url: String,
}

impl GhRepo {
    fn into_descriptor(self) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: self.id.to_string(),
            name: self.name,
            full_name: self.full_name,
            default_branch: self.default_branch,
            clone_url_https: self.clone_url,
            clone_url_ssh: self.ssh_url,
            html_url: self.html_url,
            provider: "github".to_string(),
        }
    }
}

pub struct GitHubProvider {
    http: Arc<HttpCore>,
    base_url: String,
    api_url: String,
    token: Option<String>,
    executor: GitExecutor,
    rate_limit: Arc<RateLimitTracker>,
    cache: Arc<Cache<RepositoryDescriptor>>,
}

fn record_rate_limit_headers(tracker: &RateLimitTracker, response: &reqwest::Response) {
    let headers = response.headers();
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let limit = headers
        .get("x-ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let reset_epoch: Option<u64> = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    if let (Some(remaining), Some(limit), Some(reset_epoch)) = (remaining, limit, reset_epoch) {
        let reset = SystemTime::UNIX_EPOCH + Duration::from_secs(reset_epoch);
        tracker.update(RateLimit {
            remaining,
            reset,
            limit,
        });
    }
}

impl GitHubProvider {
    pub fn new(http: Arc<HttpCore>, base_url: impl Into<String>) -> Self {
        Self::with_cache(http, base_url, Arc::new(Cache::new(512)))
    }

    pub fn with_cache(
        http: Arc<HttpCore>,
        base_url: impl Into<String>,
        cache: Arc<Cache<RepositoryDescriptor>>,
    ) -> Self {
        let base_url = base_url.into();
        let api_url = if base_url.contains("github.com") {
            "https://api.github.com".to_string()
        } else {
            format!("{base_url}/api/v3")
        };
        Self {
            http,
            base_url,
            api_url,
            token: None,
            executor: GitExecutor::new(),
            rate_limit: Arc::new(RateLimitTracker::new(RATE_LIMIT_BUFFER)),
            cache,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn record_rate_limit(&self, response: &reqwest::Response) {
        record_rate_limit_headers(&self.rate_limit, response);
    }

    /// The `Link: <url>; rel="next"` header value, if present.
    fn next_page_url(response: &reqwest::Response) -> Option<String> {
        let link = response.headers().get("link")?.to_str().ok()?;
        link.split(',').find_map(|part| {
            let mut pieces = part.split(';');
            let url = pieces.next()?.trim().trim_start_matches('<').trim_end_matches('>');
            let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
            is_next.then(|| url.to_string())
        })
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::Repositories, Capability::Webhooks, Capability::Releases]
            .into_iter()
            .collect()
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn authenticate(&mut self, creds: Credentials) -> Result<(), GzhError> {
        match creds {
            Credentials::Token(token) => {
                self.token = Some(token);
                Ok(())
            }
            _ => Err(GzhError::AuthRequired {
                guidance: format!(
                    "github requires a personal access token; see {}",
                    token_guidance_url("github", &self.base_url)
                ),
            }),
        }
    }

    async fn validate_token(&self) -> Result<TokenValidation, GzhError> {
        let ctx = Context::new();
        let url = format!("{}/user", self.api_url);
        let response = self
            .http
            .send(&ctx, "api.github.com", || self.authed(self.http.client().get(&url)))
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GzhError::AuthDenied {
                guidance: format!(
                    "token rejected by github; see {}",
                    token_guidance_url("github", &self.base_url)
                ),
            });
        }

        self.record_rate_limit(&response);
        let scopes = response
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        #[derive(Deserialize)]
        struct Me {
            login: String,
        }
        let me: Me = response
            .json()
            .await
            .map_err(|e| GzhError::Network(e.to_string()))?;

        Ok(TokenValidation {
            valid: true,
            scopes,
            user: Some(me.login),
            rate_limit: self.rate_limit.snapshot(),
        })
    }

    async fn list_repositories(
        &self,
        owner: &str,
        opts: ListOptions,
    ) -> Result<mpsc::Receiver<Result<RepositoryDescriptor, GzhError>>, GzhError> {
        let buffer = opts.buffer_cap.unwrap_or(100).max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let per_page = opts.per_page.unwrap_or(100).min(100);
        let mut url = format!(
            "{}/orgs/{owner}/repos?per_page={per_page}",
            self.api_url
        );
        let http = self.http.clone();
        let token = self.token.clone();
        let api_url = self.api_url.clone();
        let rate_limit = self.rate_limit.clone();

        tokio::spawn(async move {
            let ctx = Context::new();
            loop {
                if rate_limit.wait_if_exhausted(&ctx).await.is_err() {
                    return;
                }
                let token = token.clone();
                let request = http.send(&ctx, "api.github.com", || {
                    let builder = http.client().get(&url).header("Accept", "application/vnd.github+json");
                    match &token {
                        Some(t) => builder.bearer_auth(t),
                        None => builder,
                    }
                });

                let response = match request.await {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                record_rate_limit_headers(&rate_limit, &response);

                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    // Fall back to a user's own repos if the owner isn't an org.
                    let user_url = format!("{api_url}/users/{owner}/repos?per_page={per_page}");
                    url = user_url;
                    continue;
                }

                let next = Self::next_page_url(&response);
                let repos: Vec<GhRepo> = match response.json().await {
                    Ok(repos) => repos,
                    Err(err) => {
                        let _ = tx.send(Err(GzhError::Network(err.to_string()))).await;
                        return;
                    }
                };

                for repo in repos {
                    if tx.send(Ok(repo.into_descriptor())).await.is_err() {
                        return;
                    }
                }

                match next {
                    Some(next_url) => url = next_url,
                    None => return,
                }
            }
        });

        Ok(rx)
    }

    async fn get_repository(&self, full_name: &str) -> Result<RepositoryDescriptor, GzhError> {
        let key = CacheKey::new("github", "repository", full_name, 0);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let ctx = Context::new();
        let url = format!("{}/repos/{full_name}", self.api_url);
        let response = self
            .http
            .send(&ctx, "api.github.com", || self.authed(self.http.client().get(&url)))
            .await?;
        self.record_rate_limit(&response);
        let repo: GhRepo = response.json().await.map_err(|e| GzhError::Network(e.to_string()))?;
        let descriptor = repo.into_descriptor();
        self.cache.put_with_ttl(key, descriptor.clone(), REPOSITORY_CACHE_TTL);
        Ok(descriptor)
    }

    async fn clone_repository(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
        opts: CloneOptions,
    ) -> Result<(), GzhError> {
        let ctx = Context::with_timeout(Duration::from_secs(600));
        let depth_arg;
        let mut extra_args = Vec::new();
        if let Some(depth) = opts.depth {
            depth_arg = depth.to_string();
            extra_args.push("--depth");
            extra_args.push(&depth_arg);
        }
        self.executor
            .clone_into(&ctx, &repo.clone_url_https, target, &extra_args)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport, GzhError> {
        let ctx = Context::new();
        let started = Instant::now();
        let url = format!("{}/rate_limit", self.api_url);
        match self.http.send(&ctx, "api.github.com", || self.authed(self.http.client().get(&url))).await {
            Ok(response) => {
                self.record_rate_limit(&response);
                Ok(HealthReport {
                    status: HealthState::Healthy,
                    latency: started.elapsed(),
                    detail: format!("status {}", response.status()),
                })
            }
            Err(err) => Ok(HealthReport {
                status: HealthState::Unhealthy,
                latency: started.elapsed(),
                detail: err.to_string(),
            }),
        }
    }

    async fn get_rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_include_repositories_and_webhooks() {
        let http = Arc::new(HttpCore::new(Default::default()).unwrap());
        let provider = GitHubProvider::new(http, "https://github.com");
        assert!(provider.capabilities().contains(&Capability::Repositories));
        assert!(provider.capabilities().contains(&Capability::Webhooks));
    }

    #[test]
    fn api_url_switches_for_enterprise_base_url() {
        let http = Arc::new(HttpCore::new(Default::default()).unwrap());
        let provider = GitHubProvider::new(http, "https://github.example.com");
        assert_eq!(provider.api_url, "https://github.example.com/api/v3");
    }
}
