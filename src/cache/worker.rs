//! Fixed pool of background workers draining the task queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::histogram;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use super::events::CacheTask;
use super::queue::{TaskQueue, TaskReceivers};

const METRIC_TASK_MS: &str = "chorus_task_ms";

/// Applies one background task. Failures are handled inside; nothing is returned.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: CacheTask);
}

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn one worker per receiver onto the current runtime.
    pub fn spawn(
        queue: Arc<TaskQueue>,
        receivers: TaskReceivers,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let handles = receivers
            .0
            .into_iter()
            .enumerate()
            .map(|(worker, receiver)| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                tokio::spawn(
                    run_worker(queue, receiver, handler)
                        .instrument(info_span!("cache_worker", worker)),
                )
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "Cache worker pool started");
        Self { queue, handles }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Wait up to `grace` for queued work to finish, then stop the workers.
    ///
    /// Returns false when work was still pending at the deadline.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let drained = tokio::time::timeout(grace, self.queue.wait_idle())
            .await
            .is_ok();
        if !drained {
            warn!(
                pending = self.queue.pending(),
                grace_ms = grace.as_millis() as u64,
                "Cache workers stopped with pending tasks"
            );
        }
        for handle in &self.handles {
            handle.abort();
        }
        info!(drained, "Cache worker pool stopped");
        drained
    }
}

async fn run_worker(
    queue: Arc<TaskQueue>,
    mut receiver: mpsc::Receiver<CacheTask>,
    handler: Arc<dyn TaskHandler>,
) {
    while let Some(task) = receiver.recv().await {
        let label = task.kind.label();
        let task_id = task.id;
        let started = Instant::now();

        let outcome = AssertUnwindSafe(handler.handle(task)).catch_unwind().await;
        if outcome.is_err() {
            error!(task_id = %task_id, task_kind = label, "Cache task panicked");
        }

        histogram!(METRIC_TASK_MS, "kind" => label)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        queue.complete();
    }
}
