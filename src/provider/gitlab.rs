//! GitLab provider: numeric `page`/`per_page` pagination, recursive
//! subgroup listing.

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

const RATE_LIMIT_BUFFER: u32 = 50;
const REPOSITORY_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct GlProject {
    id: u64,
    name: String,
    path_with_namespace: String,
    default_branch: Option<String>,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    web_url: String,
}

impl GlProject {
    fn into_descriptor(self) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: self.id.to_string(),
            name: self.name,
            full_name: self.path_with_namespace,
            default_branch: self.default_branch.unwrap_or_else(|| "main".to_string()),
            clone_url_https: self.http_url_to_repo,
            clone_url_ssh: self.ssh_url_to_repo,
            html_url: self.web_url,
            provider: "gitlab".to_string(),
        }
    }
}

pub struct GitLabProvider {
    http: Arc<HttpCore>,
    base_url: String,
    token: Option<String>,
    executor: GitExecutor,
    rate_limit: Arc<RateLimitTracker>,
    cache: Arc<Cache<RepositoryDescriptor>>,
}

impl GitLabProvider {
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
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }

    fn record_rate_limit(&self, response: &reqwest::Response) {
        record_rate_limit_headers(&self.rate_limit, response);
    }
}

fn record_rate_limit_headers(tracker: &RateLimitTracker, response: &reqwest::Response) {
    let headers = response.headers();
    let remaining = headers
        .get("ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let limit = headers
        .get("ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let reset_epoch: Option<u64> = headers
        .get("ratelimit-reset")
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

#[async_trait]
impl Provider for GitLabProvider {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::Repositories, Capability::Groups, Capability::Releases]
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
                    "gitlab requires a personal access token; see {}",
                    token_guidance_url("gitlab", &self.base_url)
                ),
            }),
        }
    }

    async fn validate_token(&self) -> Result<TokenValidation, GzhError> {
        let ctx = Context::new();
        let host = self.host();
        let url = format!("{}/api/v4/user", self.base_url);
        let response = self
            .http
            .send(&ctx, &host, || self.authed(self.http.client().get(&url)))
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GzhError::AuthDenied {
                guidance: format!(
                    "token rejected by gitlab; see {}",
                    token_guidance_url("gitlab", &self.base_url)
                ),
            });
        }

        self.record_rate_limit(&response);
        #[derive(Deserialize)]
        struct Me {
            username: String,
        }
        let me: Me = response.json().await.map_err(|e| GzhError::Network(e.to_string()))?;

        Ok(TokenValidation {
            valid: true,
            scopes: Vec::new(),
            user: Some(me.username),
            rate_limit: self.rate_limit.snapshot(),
        })
    }

    /// Lists projects under `owner` (a group path), recursing into subgroups
    /// via GitLab's `include_subgroups=true` so nested groups are flattened
    /// into one stream rather than requiring the caller to walk the tree.
    async fn list_repositories(
        &self,
        owner: &str,
        opts: ListOptions,
    ) -> Result<mpsc::Receiver<Result<RepositoryDescriptor, GzhError>>, GzhError> {
        let buffer = opts.buffer_cap.unwrap_or(100).max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let per_page = opts.per_page.unwrap_or(100).min(100);
        let base_url = self.base_url.clone();
        let host = self.host();
        let owner = owner.to_string();
        let http = self.http.clone();
        let token = self.token.clone();
        let rate_limit = self.rate_limit.clone();

        tokio::spawn(async move {
            let ctx = Context::new();
            let encoded_owner = urlencoding::encode(&owner).into_owned();
            let mut page = 1u32;
            loop {
                if rate_limit.wait_if_exhausted(&ctx).await.is_err() {
                    return;
                }
                let url = format!(
                    "{base_url}/api/v4/groups/{encoded_owner}/projects?per_page={per_page}&page={page}&include_subgroups=true"
                );
                let token = token.clone();
                let response = match http
                    .send(&ctx, &host, || {
                        let builder = http.client().get(&url);
                        match &token {
                            Some(t) => builder.header("PRIVATE-TOKEN", t),
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

                record_rate_limit_headers(&rate_limit, &response);

                let next_page: Option<u32> = response
                    .headers()
                    .get("x-next-page")
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .and_then(|v| v.parse().ok());

                let projects: Vec<GlProject> = match response.json().await {
                    Ok(projects) => projects,
                    Err(err) => {
                        let _ = tx.send(Err(GzhError::Network(err.to_string()))).await;
                        return;
                    }
                };

                if projects.is_empty() && next_page.is_none() {
                    return;
                }

                for project in projects {
                    if tx.send(Ok(project.into_descriptor())).await.is_err() {
                        return;
                    }
                }

                match next_page {
                    Some(next) => page = next,
                    None => return,
                }
            }
        });

        Ok(rx)
    }

    async fn get_repository(&self, full_name: &str) -> Result<RepositoryDescriptor, GzhError> {
        let key = CacheKey::new("gitlab", "repository", full_name, 0);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let ctx = Context::new();
        let encoded = urlencoding::encode(full_name).into_owned();
        let url = format!("{}/api/v4/projects/{encoded}", self.base_url);
        let response = self
            .http
            .send(&ctx, &self.host(), || self.authed(self.http.client().get(&url)))
            .await?;
        self.record_rate_limit(&response);
        let project: GlProject = response.json().await.map_err(|e| GzhError::Network(e.to_string()))?;
        let descriptor = project.into_descriptor();
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
        let url = format!("{}/api/v4/version", self.base_url);
        match self.http.send(&ctx, &self.host(), || self.authed(self.http.client().get(&url))).await {
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
        self.rate_limit.snapshot()
    }
}
