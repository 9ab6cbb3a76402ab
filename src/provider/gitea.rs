//! Gitea provider: page/limit pagination, no subgroup recursion (Gitea has
//! no concept of nested groups) — parity with the other two is expressed
//! through `capabilities()` rather than a separate trait.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

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

const RATE_LIMIT_BUFFER: u32 = 50;
const REPOSITORY_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    id: u64,
    name: String,
    full_name: String,
    default_branch: String,
    clone_url: String,
    ssh_url: String,
    html_url: String,
}

impl GiteaRepo {
    fn into_descriptor(self) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: self.id.to_string(),
            name: self.name,
            full_name: self.full_name,
            default_branch: self.default_branch,
            clone_url_https: self.clone_url,
            clone_url_ssh: self.ssh_url,
            html_url: self.html_url,
            provider: "gitea".to_string(),
        }
    }
}

pub struct GiteaProvider {
    http: Arc<HttpCore>,
    base_url: String,
    token: Option<String>,
    executor: GitExecutor,
    rate_limit: Arc<RateLimitTracker>,
    cache: Arc<Cache<RepositoryDescriptor>>,
}

impl GiteaProvider {
    pub fn new(http: Arc<HttpCore>, base_url: impl Into<String>) -> Self {
        Self::with_cache(http, base_url, Arc::new(Cache::new(512)))
    }

    pub fn with_cache(
        http: Arc<HttpCore>,
        base_url: impl Into<String>,
        cache: Arc<Cache<RepositoryDescriptor>>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: None,
            executor: GitExecutor::new(),
            rate_limit: Arc::new(RateLimitTracker::new(RATE_LIMIT_BUFFER)),
            cache,
        }
    }

    fn host(&self) -> String {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("token {token}")),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for GiteaProvider {
    fn name(&self) -> &str {
        "gitea"
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::Repositories, Capability::Releases].into_iter().collect()
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
                    "gitea requires an application token; see {}",
                    token_guidance_url("gitea", &self.base_url)
                ),
            }),
        }
    }

    async fn validate_token(&self) -> Result<TokenValidation, GzhError> {
        let ctx = Context::new();
        let url = format!("{}/api/v1/user", self.base_url);
        let response = self
            .http
            .send(&ctx, &self.host(), || self.authed(self.http.client().get(&url)))
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GzhError::AuthDenied {
                guidance: format!(
                    "token rejected by gitea; see {}",
                    token_guidance_url("gitea", &self.base_url)
                ),
            });
        }

        #[derive(Deserialize)]
        struct Me {
            login: String,
        }
        let me: Me = response.json().await.map_err(|e| GzhError::Network(e.to_string()))?;

        Ok(TokenValidation {
            valid: true,
            scopes: Vec::new(),
            user: Some(me.login),
            rate_limit: None,
        })
    }

    async fn list_repositories(
        &self,
        owner: &str,
        opts: ListOptions,
    ) -> Result<mpsc::Receiver<Result<RepositoryDescriptor, GzhError>>, GzhError> {
        let buffer = opts.buffer_cap.unwrap_or(100).max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let limit = opts.per_page.unwrap_or(50).min(50);
        let base_url = self.base_url.clone();
        let host = self.host();
        let owner = owner.to_string();
        let http = self.http.clone();
        let token = self.token.clone();
        let rate_limit = self.rate_limit.clone();

        tokio::spawn(async move {
            let ctx = Context::new();
            let mut page = 1u32;
            loop {
                if rate_limit.wait_if_exhausted(&ctx).await.is_err() {
                    return;
                }
                let url = format!("{base_url}/api/v1/orgs/{owner}/repos?limit={limit}&page={page}");
                let token = token.clone();
                let response = match http
                    .send(&ctx, &host, || {
                        let builder = http.client().get(&url);
                        match &token {
                            Some(t) => builder.header("Authorization", format!("token {t}")),
                            None => builder,
                        }
                    })
                    .await
                {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                let repos: Vec<GiteaRepo> = match response.json().await {
                    Ok(repos) => repos,
                    Err(err) => {
                        let _ = tx.send(Err(GzhError::Network(err.to_string()))).await;
                        return;
                    }
                };

                if repos.is_empty() {
                    return;
                }

                let count = repos.len();
                for repo in repos {
                    if tx.send(Ok(repo.into_descriptor())).await.is_err() {
                        return;
                    }
                }

                if count < limit as usize {
                    return;
                }
                page += 1;
            }
        });

        Ok(rx)
    }

    async fn get_repository(&self, full_name: &str) -> Result<RepositoryDescriptor, GzhError> {
        let key = CacheKey::new("gitea", "repository", full_name, 0);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let ctx = Context::new();
        let url = format!("{}/api/v1/repos/{full_name}", self.base_url);
        let response = self
            .http
            .send(&ctx, &self.host(), || self.authed(self.http.client().get(&url)))
            .await?;
        let repo: GiteaRepo = response.json().await.map_err(|e| GzhError::Network(e.to_string()))?;
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
        let url = format!("{}/api/v1/version", self.base_url);
        match self.http.send(&ctx, &self.host(), || self.http.client().get(&url)).await {
            Ok(response) => Ok(HealthReport {
                status: HealthState::Healthy,
                latency: started.elapsed(),
                detail: format!("status {}", response.status()),
            }),
            Err(err) => Ok(HealthReport {
                status: HealthState::Unhealthy,
                latency: started.elapsed(),
                detail: err.to_string(),
            }),
        }
    }

    async fn get_rate_limit(&self) -> Option<RateLimit> {
        None
    }
}
