//! Connection pool, TLS policy, retry/backoff, and per-host rate limiting
//! shared by every provider.

mod rate_limiter;
mod retry;

pub use rate_limiter::{RateLimitTracker, TokenBucket};
pub use retry::{BackoffKind, RetryPolicy};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::context::Context;
use crate::error::GzhError;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub max_idle_per_host: usize,
    pub redirect_limit: usize,
    pub burst: u32,
    pub refill_per_sec: f64,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 16,
            redirect_limit: 5,
            burst: 10,
            refill_per_sec: 5.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// One pooled client shared by every provider built from the same
/// `Services` record.
pub struct HttpCore {
    client: reqwest::Client,
    config: HttpConfig,
    limiters: Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
}

impl HttpCore {
    pub fn new(config: HttpConfig) -> Result<Self, GzhError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit))
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| GzhError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            limiters: Mutex::new(HashMap::new()),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn limiter_for(&self, host: &str) -> std::sync::Arc<TokenBucket> {
        let mut limiters = self.limiters.lock().expect("limiter map lock poisoned");
        limiters
            .entry(host.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(TokenBucket::new(self.config.burst, self.config.refill_per_sec))
            })
            .clone()
    }

    /// Issues `build_request` (a closure producing a fresh `reqwest::Request`
    /// builder each attempt) under the per-host rate limiter and the retry
    /// policy, retrying on `{connection refused, timeout, reset, no such
    /// host, 429, 5xx}`.
    pub async fn send(
        &self,
        ctx: &Context,
        host: &str,
        build_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GzhError> {
        let limiter = self.limiter_for(host);
        let retry = self.config.retry;

        retry
            .run(ctx, |_attempt| {
                let limiter = limiter.clone();
                let request = build_request();
                async move {
                    limiter.acquire(ctx).await?;
                    let response = ctx
                        .run(request.send())
                        .await?
                        .map_err(classify_reqwest_error)?;

                    let status = response.status().as_u16();
                    debug!(host, status, "http response");
                    if retry::is_retryable_status(status) {
                        return Err(GzhError::Network(format!(
                            "retryable status {status} from {host}"
                        )));
                    }
                    Ok(response)
                }
            })
            .await
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> GzhError {
    if err.is_timeout() || err.is_connect() {
        GzhError::Network(err.to_string())
    } else {
        GzhError::Network(err.to_string())
    }
}

/// Linear/exponential delay helper reused outside the HTTP path (e.g. the
/// Repository Pool's git-operation retry wrapper) so both layers share one
/// backoff shape.
pub fn capped_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.saturating_mul(attempt.max(1)).min(max)
}
