//! Seen watermarks and unseen counts.
//!
//! A watermark is the highest message ID a user has seen in a conversation.
//! Cached watermarks only ever lag the store, so they can under-report what
//! was seen but not over-report it. A cached value newer than the newest
//! message in the conversation cannot be right and is replaced by the store's.

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::application::error::AppError;
use crate::application::index::OrderedIndex;
use crate::application::repos::DurableStore;
use crate::application::resolver::Resolver;
use crate::cache::keys::watermark_key;
use crate::cache::{CacheBackend, CacheError, TaskKind, TaskQueue, cache_fallback};
use crate::domain::entities::MessageRecord;
use crate::domain::types::Container;

const UNSEEN_BATCH: u64 = 50;

pub struct SeenTracker {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn DurableStore>,
    index: Arc<OrderedIndex>,
    resolver: Arc<Resolver>,
    tasks: Arc<TaskQueue>,
}

impl SeenTracker {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
        index: Arc<OrderedIndex>,
        resolver: Arc<Resolver>,
        tasks: Arc<TaskQueue>,
    ) -> Self {
        Self {
            cache,
            store,
            index,
            resolver,
            tasks,
        }
    }

    /// Highest message ID `user_id` has seen; zero when nothing was seen.
    #[instrument(skip(self))]
    pub async fn watermark(&self, user_id: i64, conversation_id: i64) -> Result<i64, AppError> {
        if let Some(cached) = self.cached_watermark(user_id, conversation_id).await {
            let newest = self
                .index
                .window(Container::conversation_messages(conversation_id), 0, 1)
                .await?
                .first()
                .copied()
                .unwrap_or(0);
            if cached <= newest {
                return Ok(cached);
            }
            warn!(
                user_id,
                conversation_id,
                cached,
                newest,
                "Cached watermark is ahead of the newest message; using the store"
            );
        }

        let stored = self
            .store
            .seen_watermark(user_id, conversation_id)
            .await
            .map_err(|err| AppError::from_repo("conversation", err))?
            .unwrap_or(0);
        if stored > 0 {
            self.tasks.submit(TaskKind::StoreWatermark {
                user_id,
                conversation_id,
                watermark: stored,
            });
        }
        Ok(stored)
    }

    /// Messages newer than the watermark that someone else sent.
    ///
    /// Counted from the cached index when every unseen message lies within
    /// the horizon and resolves; otherwise counted by the store.
    #[instrument(skip(self))]
    pub async fn unseen_count(&self, user_id: i64, conversation_id: i64) -> Result<u64, AppError> {
        let watermark = self.watermark(user_id, conversation_id).await?;
        let container = Container::conversation_messages(conversation_id);
        let horizon = self.index.horizon(container);

        let mut unseen = Vec::new();
        let mut start = 0;
        let mut bounded = false;
        while start < horizon && !bounded {
            let batch = UNSEEN_BATCH.min(horizon - start);
            let ids = self.index.window(container, start, batch).await?;
            bounded = (ids.len() as u64) < batch;
            for id in ids {
                if id <= watermark {
                    bounded = true;
                    break;
                }
                unseen.push(id);
            }
            start += batch;
        }

        if bounded {
            let messages = self.resolver.resolve_many::<MessageRecord>(&unseen).await?;
            if messages.len() == unseen.len() {
                return Ok(messages
                    .iter()
                    .filter(|message| message.sender_id != user_id)
                    .count() as u64);
            }
        }

        self.store
            .count_unseen(user_id, conversation_id, watermark)
            .await
            .map_err(|err| AppError::from_repo("conversation", err))
    }

    async fn cached_watermark(&self, user_id: i64, conversation_id: i64) -> Option<i64> {
        match self
            .cache
            .get(&watermark_key(user_id, conversation_id))
            .await
        {
            Ok(Some(raw)) => match raw.parse::<i64>() {
                Ok(watermark) => Some(watermark),
                Err(err) => {
                    cache_fallback("watermark", &CacheError::codec(err));
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                cache_fallback("get", &err);
                None
            }
        }
    }
}
