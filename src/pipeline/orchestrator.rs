//! Worker pool that drains the work queue.
//!
//! Each attempt runs on the blocking thread pool with a per-attempt timeout.
//! A timeout counts as a retryable failure. The blocking call itself cannot be
//! aborted: the flag of that attempt is raised and it is left to finish in the
//! background, which is safe because scans stop at the flag and extraction is
//! idempotent. The retry gets a fresh flag, and the timeout never marks the
//! unit as cancelled.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::PipelineContext;
use crate::config::PipelineConfig;
use crate::db::WatchFolder;
use crate::error::{Error, Result};
use crate::lifecycle;
use crate::tasks::{BackoffPolicy, Claim, Enqueued, QueueSnapshot, WorkEvent, WorkQueue, WorkTarget};

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn start(ctx: PipelineContext, config: &PipelineConfig) -> Self {
        let ctx = Arc::new(ctx);
        let queue = Arc::new(WorkQueue::new(BackoffPolicy::from(config)));
        let timeout = config.attempt_timeout();

        let workers = (0..config.workers)
            .map(|worker| {
                let ctx = Arc::clone(&ctx);
                let queue = Arc::clone(&queue);
                tokio::spawn(worker_loop(worker, ctx, queue, timeout))
            })
            .collect();

        tracing::info!(workers = config.workers, ?timeout, "Pipeline started");
        Self { ctx, queue, workers }
    }

    pub fn enqueue(&self, target: WorkTarget) -> Enqueued {
        self.queue.enqueue(target)
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkEvent> {
        self.queue.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.queue.watch()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// Cancel pending scans of a watch folder, then delete it.
    pub fn remove_watch_folder(&self, folder_id: i64) -> Result<WatchFolder> {
        self.queue.cancel_folder(folder_id);
        lifecycle::remove_watch_folder(&self.ctx.db, folder_id)
    }

    /// Stop handing out work and wait for the workers to finish their current unit.
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Pipeline stopped");
    }
}

async fn worker_loop(worker: usize, ctx: Arc<PipelineContext>, queue: Arc<WorkQueue>, timeout: Duration) {
    tracing::debug!(worker, "Worker started");
    while let Some(claim) = queue.next().await {
        tracing::debug!(worker, target = %claim.target, attempt = claim.attempt, "Running work");

        match run_attempt(&ctx, &claim, timeout).await {
            Ok(follow_ups) => queue.complete(claim.id, &follow_ups),
            Err(e) => {
                if let Some(delay) = queue.fail(claim.id, &e) {
                    let queue = Arc::clone(&queue);
                    let id = claim.id;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.release(id);
                    });
                }
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

async fn run_attempt(ctx: &Arc<PipelineContext>, claim: &Claim, timeout: Duration) -> Result<Vec<WorkTarget>> {
    let task = {
        let ctx = Arc::clone(ctx);
        let target = claim.target;
        let cancel = Arc::clone(&claim.cancel);
        tokio::task::spawn_blocking(move || ctx.execute(target, &cancel))
    };

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Internal(format!("worker panicked: {}", e))),
        Err(_) => {
            claim.cancel.store(true, Ordering::SeqCst);
            Err(Error::Timeout(timeout))
        }
    }
}
