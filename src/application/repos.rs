//! Repository traits describing the durable store.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::IndexCursor;
use crate::domain::entities::{
    CommentRecord, ConversationRecord, Entity, MessageRecord, PostRecord,
};
use crate::domain::types::{Container, EntityKey, EntityKind, IndexEntry};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Where a store page starts within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBoundary {
    /// Skip this many newest members.
    Offset(u64),
    /// Members strictly older than the cursor.
    Before(IndexCursor),
    /// Members strictly newer than the cursor; the newest ones are returned.
    After(IndexCursor),
}

#[derive(Debug, Clone)]
pub struct NewMessageParams {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct NewPostParams {
    pub author_id: i64,
    pub network_id: i64,
    pub body: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewCommentParams {
    pub post_id: i64,
    pub author_id: i64,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LikePostParams {
    pub post_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct MarkSeenParams {
    pub user_id: i64,
    pub conversation_id: i64,
    /// Highest message ID the user has now seen.
    pub up_to: i64,
}

/// A stored message with its conversation after the activity update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: MessageRecord,
    pub conversation: ConversationRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredComment {
    pub comment: CommentRecord,
    pub post_author_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredLike {
    pub post_id: i64,
    pub user_id: i64,
    pub post_author_id: i64,
    /// False when the like already existed.
    pub inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenUpdate {
    pub user_id: i64,
    pub conversation_id: i64,
    /// Stored watermark after the update; never lower than before.
    pub watermark: i64,
    /// Messages flipped to seen by this update.
    pub newly_seen: Vec<i64>,
}

#[async_trait]
pub trait EntitiesRepo: Send + Sync {
    async fn find_entity(&self, key: EntityKey) -> Result<Option<Entity>, RepoError>;

    /// Entities of one kind; missing IDs are omitted, order is unspecified.
    async fn find_entities(&self, kind: EntityKind, ids: &[i64])
    -> Result<Vec<Entity>, RepoError>;

    async fn seen_watermark(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<Option<i64>, RepoError>;

    /// Messages newer than `watermark` sent by someone other than `user_id`.
    async fn count_unseen(
        &self,
        user_id: i64,
        conversation_id: i64,
        watermark: i64,
    ) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait IndexRepo: Send + Sync {
    /// Up to `limit` members, newest first with ties broken by member ID descending.
    async fn page_index(
        &self,
        container: Container,
        boundary: StoreBoundary,
        limit: u64,
    ) -> Result<Vec<IndexEntry>, RepoError>;

    async fn count_index(&self, container: Container) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait MutationsRepo: Send + Sync {
    /// Insert a message and bump its conversation's last activity atomically.
    async fn insert_message(&self, params: NewMessageParams) -> Result<StoredMessage, RepoError>;

    async fn insert_post(&self, params: NewPostParams) -> Result<PostRecord, RepoError>;

    async fn insert_comment(&self, params: NewCommentParams) -> Result<StoredComment, RepoError>;

    async fn like_post(&self, params: LikePostParams) -> Result<StoredLike, RepoError>;

    async fn mark_seen(&self, params: MarkSeenParams) -> Result<SeenUpdate, RepoError>;
}

/// The complete durable store.
pub trait DurableStore: EntitiesRepo + IndexRepo + MutationsRepo {}

impl<T> DurableStore for T where T: EntitiesRepo + IndexRepo + MutationsRepo {}
