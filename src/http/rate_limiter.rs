//! Per-host token bucket and per-(provider, baseURL) rate-limit
//! snapshot coordination.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::context::Context;
use crate::error::GzhError;
use crate::provider::RateLimit;

/// A single shared structure, updated atomically, bounding request bursts
/// per host.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(burst: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
            capacity: f64::from(burst),
            refill_per_sec,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Blocks (honoring cancellation) until a token is available.
    pub async fn acquire(&self, ctx: &Context) -> Result<(), GzhError> {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket lock poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return Ok(()),
                Some(delay) => {
                    ctx.run(tokio::time::sleep(delay)).await?;
                }
            }
        }
    }
}

/// `{remaining, reset, limit}`, updated from response headers on every
/// call, guarded the way §5 requires (single-writer, multi-reader).
pub struct RateLimitTracker {
    state: Mutex<Option<RateLimit>>,
    /// If `remaining <= buffer`, the caller sleeps until `reset` before
    /// issuing the next request.
    buffer: u32,
}

impl RateLimitTracker {
    pub fn new(buffer: u32) -> Self {
        Self {
            state: Mutex::new(None),
            buffer,
        }
    }

    pub fn update(&self, snapshot: RateLimit) {
        *self.state.lock().expect("rate limit lock poisoned") = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<RateLimit> {
        *self.state.lock().expect("rate limit lock poisoned")
    }

    /// Sleeps until `reset` if the tracked snapshot shows the buffer has
    /// been breached, honoring cancellation.
    pub async fn wait_if_exhausted(&self, ctx: &Context) -> Result<(), GzhError> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(());
        };

        if snapshot.remaining > self.buffer {
            return Ok(());
        }

        let now = SystemTime::now();
        let Ok(wait) = snapshot.reset.duration_since(now) else {
            return Ok(());
        };

        ctx.run(tokio::time::sleep(wait)).await?;
        Ok(())
    }
}
