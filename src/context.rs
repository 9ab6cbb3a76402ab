//! A minimal propagated cancellation context.
//!
//! One root context spans a whole command (a bulk sync or an environment
//! switch); it is cloned cheaply into every worker, HTTP call, and git
//! subprocess so cancelling it unblocks all of them at once. This plays the
//! role Go's `context.Context` plays in the original design, scaled down to
//! what this core actually needs: cancellation plus an optional deadline.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::GzhError;

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                deadline: None,
            }),
        }
    }

    /// A context that auto-cancels after `timeout` elapses, per job deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    /// Derive a child context that also observes this timeout, without
    /// losing the parent's cancellation.
    pub fn with_child_timeout(&self, timeout: Duration) -> Self {
        let child = self.clone();
        let limited = Self::with_timeout(timeout);
        // Cancelling either propagates: spawn a watcher that cancels the
        // child context if the parent is cancelled first.
        let watcher_child = limited.clone();
        tokio::spawn(async move {
            child.cancelled_signal().await;
            watcher_child.cancel();
        });
        limited
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                self.inner.cancelled.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    pub fn err(&self) -> Option<GzhError> {
        self.is_cancelled().then_some(GzhError::Cancelled)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn cancelled_signal(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Race a future against cancellation, the way every suspension point in
    /// §5 is required to.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, GzhError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            out = fut => Ok(out),
            () = self.cancelled_signal() => Err(GzhError::Cancelled),
        }
    }
}
