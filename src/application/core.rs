//! Assembled cache core and its background task handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::application::coordinator::Coordinator;
use crate::application::error::AppError;
use crate::application::index::OrderedIndex;
use crate::application::pagination::PageMode;
use crate::application::propagator::{Committed, FanOut, Mutation, Propagator};
use crate::application::repos::DurableStore;
use crate::application::resolver::{Resolver, encode_entity};
use crate::application::seen::SeenTracker;
use crate::cache::keys::{record_key, watermark_key};
use crate::cache::{
    CacheBackend, CacheConfig, CacheTask, GuardedCache, QueueConfig, TaskHandler, TaskKind,
    TaskQueue, WorkerPool,
};
use crate::domain::entities::{Entity, Record};
use crate::domain::types::Container;

/// Resolver, index manager, propagator and coordinator sharing one cache,
/// one store and one background worker pool.
pub struct CacheCore {
    resolver: Arc<Resolver>,
    index: Arc<OrderedIndex>,
    propagator: Propagator,
    coordinator: Coordinator,
    seen: SeenTracker,
    tasks: Arc<TaskQueue>,
    workers: WorkerPool,
}

impl CacheCore {
    /// Build the core and spawn its workers onto the current runtime.
    ///
    /// `cache` is wrapped so every operation observes `config.op_timeout_ms`.
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
        config: &CacheConfig,
        queue: QueueConfig,
    ) -> Self {
        let cache: Arc<dyn CacheBackend> = Arc::new(GuardedCache::new(cache, config.op_timeout()));
        let (tasks, receivers) = TaskQueue::new(queue);
        let tasks = Arc::new(tasks);

        let resolver = Arc::new(Resolver::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&tasks),
        ));
        let index = Arc::new(OrderedIndex::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&tasks),
            config.horizons,
        ));
        let propagator = Propagator::new(Arc::clone(&store), Arc::clone(&tasks));
        let coordinator = Coordinator::new(Arc::clone(&index), Arc::clone(&resolver));
        let seen = SeenTracker::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&resolver),
            Arc::clone(&tasks),
        );

        let handler = Arc::new(CoreTaskHandler {
            cache: Arc::clone(&cache),
            index: Arc::clone(&index),
            fan_out: FanOut::new(cache, store, Arc::clone(&index)),
        });
        let workers = WorkerPool::spawn(Arc::clone(&tasks), receivers, handler);

        Self {
            resolver,
            index,
            propagator,
            coordinator,
            seen,
            tasks,
            workers,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn index(&self) -> &OrderedIndex {
        &self.index
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn seen(&self) -> &SeenTracker {
        &self.seen
    }

    pub async fn resolve<R: Record>(&self, id: i64) -> Result<R, AppError> {
        self.resolver.resolve::<R>(id).await
    }

    pub async fn page(
        &self,
        container: Container,
        mode: PageMode,
        page_size: u32,
    ) -> Result<Vec<i64>, AppError> {
        self.coordinator.page(container, mode, page_size).await
    }

    pub async fn commit(&self, mutation: Mutation) -> Result<Committed, AppError> {
        self.propagator.commit(mutation).await
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    /// Resolve once every queued background task has been applied.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    /// Drain background work for up to `grace`, then stop the workers.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.workers.shutdown(grace).await
    }
}

struct CoreTaskHandler {
    cache: Arc<dyn CacheBackend>,
    index: Arc<OrderedIndex>,
    fan_out: FanOut,
}

impl CoreTaskHandler {
    /// Warm records read from the store. Keys that already hold a value are
    /// left alone, since a fan-out write may have landed after the read.
    async fn populate(&self, entities: &[Entity]) {
        let mut entries = Vec::with_capacity(entities.len());
        for entity in entities {
            match encode_entity(entity) {
                Ok(payload) => entries.push((record_key(&entity.key()), payload)),
                Err(err) => warn!(key = %entity.key(), error = %err, "Failed to encode record for cache"),
            }
        }
        if entries.is_empty() {
            return;
        }
        match self.cache.set_many_if_absent(&entries).await {
            Ok(written) => debug!(records = entries.len(), written, "Cache populated"),
            Err(err) => debug!(records = entries.len(), error = %err, "Cache populate skipped"),
        }
    }

    async fn repair(&self, entity: &Entity, corrupt: &str) {
        let key = record_key(&entity.key());
        let payload = match encode_entity(entity) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to encode record for cache");
                return;
            }
        };
        match self.cache.replace_if_equals(&key, corrupt, &payload).await {
            Ok(replaced) => debug!(key = %key, replaced, "Undecodable cache value repaired"),
            Err(err) => debug!(key = %key, error = %err, "Cache repair skipped"),
        }
    }
}

#[async_trait]
impl TaskHandler for CoreTaskHandler {
    #[instrument(
        skip_all,
        fields(task_id = %task.id, task_kind = task.kind.label(), epoch = task.epoch)
    )]
    async fn handle(&self, task: CacheTask) {
        match task.kind {
            TaskKind::Populate(entity) => self.populate(std::slice::from_ref(&entity)).await,
            TaskKind::PopulateMany(entities) => self.populate(&entities).await,
            TaskKind::Repair { entity, corrupt } => self.repair(&entity, &corrupt).await,
            TaskKind::Rebuild(container) => self.index.run_scheduled_rebuild(container).await,
            TaskKind::FanOut(committed) => self.fan_out.apply(&committed).await,
            TaskKind::StoreWatermark {
                user_id,
                conversation_id,
                watermark,
            } => {
                if let Err(err) = self
                    .cache
                    .set_max(&watermark_key(user_id, conversation_id), watermark)
                    .await
                {
                    debug!(user_id, conversation_id, error = %err, "Watermark populate skipped");
                }
            }
        }
    }
}
