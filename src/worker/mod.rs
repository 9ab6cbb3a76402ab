//! Generic typed job queue: fixed workers, per-job deadline context.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::GzhError;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub buffer_size: usize,
    pub timeout: Duration,
}

/// A submitted unit of work paired with the function that executes it.
struct Submission<T, R> {
    data: T,
    job: Box<dyn FnOnce(T, Context) -> BoxFuture<'static, R> + Send>,
}

/// `{data, error}` forwarded to the output channel for every completed job.
#[derive(Debug)]
pub struct JobOutcome<T, R> {
    pub data: T,
    pub result: R,
}

enum Lifecycle {
    New,
    Started,
    Stopped,
}

/// Generic over job type `T`, producing results of type `R`. Lifecycle is
/// one-way: `new -> started -> stopped`.
pub struct WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    config: WorkerPoolConfig,
    input_tx: Option<mpsc::Sender<Submission<T, R>>>,
    input_rx: Option<mpsc::Receiver<Submission<T, R>>>,
    output_rx: Option<mpsc::Receiver<JobOutcome<T, R>>>,
    output_tx: Option<mpsc::Sender<JobOutcome<T, R>>>,
    workers: Vec<JoinHandle<()>>,
    parent_ctx: Context,
    lifecycle: Lifecycle,
}

impl<T, R> WorkerPool<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new(config: WorkerPoolConfig, parent_ctx: Context) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.buffer_size);
        let (output_tx, output_rx) = mpsc::channel(config.buffer_size.max(1));
        Self {
            config,
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            output_rx: Some(output_rx),
            output_tx: Some(output_tx),
            workers: Vec::new(),
            parent_ctx,
            lifecycle: Lifecycle::New,
        }
    }

    /// Spawns `worker_count` workers consuming jobs until the input closes.
    pub fn start(&mut self) {
        let mut input_rx = self
            .input_rx
            .take()
            .expect("start() called more than once");
        let output_tx = self.output_tx.clone().expect("output channel present");
        let timeout = self.config.timeout;
        let parent_ctx = self.parent_ctx.clone();

        // Workers share one receiver end via a task-local mpsc fan-in: spawn
        // one task that owns the receiver and dispatches to a bounded set of
        // concurrently-running jobs, matching "fixed workers draining one
        // queue" without requiring T/R to be cloneable across tasks.
        let worker_count = self.config.worker_count.max(1);
        let dispatcher = tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_count));
            let mut handles = Vec::new();

            while let Some(submission) = input_rx.recv().await {
                let permit = semaphore.clone().acquire_owned().await;
                let output_tx = output_tx.clone();
                let job_ctx = parent_ctx.with_child_timeout(timeout);
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let data = submission.data.clone();
                    let fut = (submission.job)(submission.data, job_ctx);
                    let result = fut.await;
                    let _ = output_tx.send(JobOutcome { data, result }).await;
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
        });

        self.workers.push(dispatcher);
        self.lifecycle = Lifecycle::Started;
    }

    /// Enqueues `{data, fn}`; on a full queue returns `QueueFull` rather than
    /// blocking.
    pub fn submit<F, Fut>(&self, data: T, job: F) -> Result<(), GzhError>
    where
        F: FnOnce(T, Context) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
    {
        let Some(tx) = &self.input_tx else {
            return Err(GzhError::QueueFull);
        };

        let submission = Submission {
            data,
            job: Box::new(move |data, ctx| Box::pin(job(data, ctx)) as BoxFuture<'static, R>),
        };

        tx.try_send(submission).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => GzhError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => GzhError::QueueFull,
        })
    }

    /// Takes the output receiver; only meaningful after `start()`.
    pub fn outputs(&mut self) -> &mut mpsc::Receiver<JobOutcome<T, R>> {
        self.output_rx.as_mut().expect("outputs taken or pool not started")
    }

    /// Closes the input, waits for all workers to drain, then drops the
    /// sender (closing outputs).
    pub async fn stop(mut self) -> Result<(), GzhError> {
        self.input_tx.take();
        self.output_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    /// Force-cancels the root context if draining exceeds `deadline`.
    pub async fn stop_with_timeout(self, deadline: Duration) -> Result<(), GzhError> {
        let parent_ctx = self.parent_ctx.clone();
        match tokio::time::timeout(deadline, self.stop()).await {
            Ok(result) => result,
            Err(_) => {
                parent_ctx.cancel();
                Err(GzhError::ShutdownTimeout)
            }
        }
    }
}
