//! Bounded, partitioned task queue.
//!
//! One bounded channel per worker. A task is routed by hashing its partition
//! key, so every task touching one container is applied in submission order.
//! A full channel drops the task instead of blocking the submitting request.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics::{counter, gauge};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use super::events::{CacheTask, Epoch, TaskKind};
use super::keys::hash_value;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of workers, and therefore channels.
    pub workers: usize,
    /// Capacity of each worker's channel.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&crate::config::WorkerSettings> for QueueConfig {
    fn from(settings: &crate::config::WorkerSettings) -> Self {
        Self {
            workers: settings.count.get() as usize,
            capacity: settings.queue_capacity.get() as usize,
        }
    }
}

/// Receiving halves handed to the worker pool, one per worker.
pub struct TaskReceivers(pub(crate) Vec<mpsc::Receiver<CacheTask>>);

pub struct TaskQueue {
    senders: Vec<mpsc::Sender<CacheTask>>,
    epoch_counter: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> (Self, TaskReceivers) {
        let workers = config.workers.max(1);
        let capacity = config.capacity.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..workers).map(|_| mpsc::channel(capacity)).unzip();
        let queue = Self {
            senders,
            epoch_counter: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        };
        (queue, TaskReceivers(receivers))
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue a task without waiting. Returns false if the task was dropped.
    pub fn submit(&self, kind: TaskKind) -> bool {
        let partition = kind.partition_key();
        let slot = (hash_value(partition.as_str()) % self.senders.len() as u64) as usize;
        let task = CacheTask::new(kind, self.next_epoch());
        let (task_id, epoch, label) = (task.id, task.epoch, task.kind.label());

        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.senders[slot].try_send(task) {
            Ok(()) => {
                debug!(
                    task_id = %task_id,
                    task_epoch = epoch,
                    task_kind = label,
                    partition = %partition,
                    worker = slot,
                    "Cache task enqueued"
                );
                self.record_depth();
                true
            }
            Err(err) => {
                let reason = match err {
                    TrySendError::Full(_) => "full",
                    TrySendError::Closed(_) => "closed",
                };
                warn!(
                    task_id = %task_id,
                    task_kind = label,
                    partition = %partition,
                    reason,
                    "Cache task dropped"
                );
                counter!("chorus_task_dropped_total", "kind" => label, "reason" => reason)
                    .increment(1);
                self.complete();
                false
            }
        }
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every submitted task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Mark one task as finished; called by workers.
    pub(crate) fn complete(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
        self.record_depth();
    }

    fn record_depth(&self) {
        gauge!("chorus_task_queue_len").set(self.pending() as f64);
    }
}
