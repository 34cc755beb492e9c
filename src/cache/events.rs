//! Background cache tasks and realtime notifications.
//!
//! Tasks are produced by reads (populate, rebuild) and writes (fan-out) and are
//! applied by the worker pool. Realtime events are the JSON payloads published
//! to per-user, per-conversation and per-network channels.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::propagator::Committed;
use crate::domain::entities::{CommentRecord, Entity, MessageRecord, PostRecord};
use crate::domain::types::Container;

use super::keys::{record_key, watermark_key};

/// Monotonic epoch for ordering tasks within this process.
pub type Epoch = u64;

#[derive(Debug, Clone)]
pub struct CacheTask {
    /// Unique identifier for log correlation.
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: TaskKind,
    pub enqueued_at: OffsetDateTime,
}

impl CacheTask {
    pub fn new(kind: TaskKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Write one resolved record into the cache.
    Populate(Entity),
    /// Write a batch of resolved records with one multi-set.
    PopulateMany(Vec<Entity>),
    /// Replace an undecodable cached value, unless it has changed since.
    Repair { entity: Entity, corrupt: String },
    /// Repopulate a container's index from the store.
    Rebuild(Container),
    /// Post-commit cache and pub/sub updates for a store write.
    FanOut(Committed),
    /// Cache a watermark read from the store.
    StoreWatermark {
        user_id: i64,
        conversation_id: i64,
        watermark: i64,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Populate(_) => "populate",
            TaskKind::PopulateMany(_) => "populate_many",
            TaskKind::Repair { .. } => "repair",
            TaskKind::Rebuild(_) => "rebuild",
            TaskKind::FanOut(_) => "fan_out",
            TaskKind::StoreWatermark { .. } => "store_watermark",
        }
    }

    /// Tasks sharing a partition key run in submission order on one worker.
    pub fn partition_key(&self) -> String {
        match self {
            TaskKind::Populate(entity) => record_key(&entity.key()),
            TaskKind::PopulateMany(entities) => entities
                .first()
                .map(|entity| record_key(&entity.key()))
                .unwrap_or_default(),
            TaskKind::Repair { entity, .. } => record_key(&entity.key()),
            TaskKind::Rebuild(container) => container.to_string(),
            TaskKind::FanOut(committed) => committed.partition().to_string(),
            TaskKind::StoreWatermark {
                user_id,
                conversation_id,
                ..
            } => watermark_key(*user_id, *conversation_id),
        }
    }
}

/// Payload published on realtime channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageCreated {
        message: MessageRecord,
    },
    PostCreated {
        post: PostRecord,
    },
    CommentCreated {
        comment: CommentRecord,
    },
    PostLiked {
        post_id: i64,
        user_id: i64,
    },
    MessagesSeen {
        conversation_id: i64,
        user_id: i64,
        watermark: i64,
    },
}
