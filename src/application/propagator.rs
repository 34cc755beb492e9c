//! Write propagation.
//!
//! A mutation is written to the store inside the caller's request. Once the
//! store has accepted it, the committed result is returned and a fan-out task
//! is queued: cached records are refreshed, cached indices appended to and
//! realtime events published. Fan-out failures are logged and counted only.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::error::AppError;
use crate::application::index::OrderedIndex;
use crate::application::repos::{
    DurableStore, LikePostParams, MarkSeenParams, NewCommentParams, NewMessageParams,
    NewPostParams, RepoError, SeenUpdate, StoredComment, StoredLike, StoredMessage,
};
use crate::application::resolver::encode_entity;
use crate::cache::keys::{
    conversation_channel, network_channel, record_key, user_channel, watermark_key,
};
use crate::cache::{CacheBackend, CacheError, RealtimeEvent, TaskKind, TaskQueue};
use crate::domain::entities::{Entity, PostRecord};
use crate::domain::types::{Container, EntityKey, EntityKind, IndexEntry};

const MAX_BODY_CHARS: usize = 10_000;

/// A write accepted by [`Propagator::commit`].
#[derive(Debug, Clone)]
pub enum Mutation {
    NewMessage(NewMessageParams),
    NewPost(NewPostParams),
    NewComment(NewCommentParams),
    LikePost(LikePostParams),
    MarkSeen(MarkSeenParams),
}

impl Mutation {
    pub fn label(&self) -> &'static str {
        match self {
            Mutation::NewMessage(_) => "new_message",
            Mutation::NewPost(_) => "new_post",
            Mutation::NewComment(_) => "new_comment",
            Mutation::LikePost(_) => "like_post",
            Mutation::MarkSeen(_) => "mark_seen",
        }
    }

    /// Entity named in a `NotFound` raised by the store for this mutation.
    fn target(&self) -> &'static str {
        match self {
            Mutation::NewMessage(_) | Mutation::MarkSeen(_) => "conversation",
            Mutation::NewPost(_) => "network",
            Mutation::NewComment(_) | Mutation::LikePost(_) => "post",
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match self {
            Mutation::NewMessage(params) => {
                positive("conversation_id", params.conversation_id)?;
                positive("sender_id", params.sender_id)?;
                body("message body", &params.body, false)
            }
            Mutation::NewPost(params) => {
                positive("author_id", params.author_id)?;
                positive("network_id", params.network_id)?;
                body("post body", &params.body, !params.images.is_empty())
            }
            Mutation::NewComment(params) => {
                positive("post_id", params.post_id)?;
                positive("author_id", params.author_id)?;
                body("comment body", &params.body, false)
            }
            Mutation::LikePost(params) => {
                positive("post_id", params.post_id)?;
                positive("user_id", params.user_id)
            }
            Mutation::MarkSeen(params) => {
                positive("user_id", params.user_id)?;
                positive("conversation_id", params.conversation_id)?;
                positive("up_to", params.up_to)
            }
        }
    }
}

fn positive(field: &str, value: i64) -> Result<(), AppError> {
    if value > 0 {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{field} must be positive, got {value}"
        )))
    }
}

fn body(what: &str, text: &str, may_be_empty: bool) -> Result<(), AppError> {
    if text.trim().is_empty() && !may_be_empty {
        return Err(AppError::validation(format!("{what} must not be empty")));
    }
    if text.chars().count() > MAX_BODY_CHARS {
        return Err(AppError::validation(format!(
            "{what} exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

/// What the store committed, carried to the fan-out task.
#[derive(Debug, Clone)]
pub enum Committed {
    Message(StoredMessage),
    Post(PostRecord),
    Comment(StoredComment),
    Like(StoredLike),
    Seen(SeenUpdate),
}

impl Committed {
    /// Container whose updates must stay in commit order.
    pub fn partition(&self) -> Container {
        match self {
            Committed::Message(stored) => {
                Container::conversation_messages(stored.message.conversation_id)
            }
            Committed::Seen(update) => Container::conversation_messages(update.conversation_id),
            Committed::Post(post) => Container::network_posts(post.network_id),
            Committed::Comment(stored) => Container::post_comments(stored.comment.post_id),
            Committed::Like(like) => Container::post_comments(like.post_id),
        }
    }
}

pub struct Propagator {
    store: Arc<dyn DurableStore>,
    tasks: Arc<TaskQueue>,
}

impl Propagator {
    pub fn new(store: Arc<dyn DurableStore>, tasks: Arc<TaskQueue>) -> Self {
        Self { store, tasks }
    }

    /// Write `mutation` to the store and queue its fan-out.
    ///
    /// Returns as soon as the store write succeeds; a store failure is
    /// returned unchanged in kind and nothing is queued.
    #[instrument(skip(self, mutation), fields(mutation = mutation.label()))]
    pub async fn commit(&self, mutation: Mutation) -> Result<Committed, AppError> {
        mutation.validate()?;
        let target = mutation.target();
        let committed = match mutation {
            Mutation::NewMessage(params) => {
                Committed::Message(self.store.insert_message(params).await.map_err(
                    |err| AppError::from_repo(target, err),
                )?)
            }
            Mutation::NewPost(params) => Committed::Post(
                self.store
                    .insert_post(params)
                    .await
                    .map_err(|err| AppError::from_repo(target, err))?,
            ),
            Mutation::NewComment(params) => Committed::Comment(
                self.store
                    .insert_comment(params)
                    .await
                    .map_err(|err| AppError::from_repo(target, err))?,
            ),
            Mutation::LikePost(params) => Committed::Like(
                self.store
                    .like_post(params)
                    .await
                    .map_err(|err| AppError::from_repo(target, err))?,
            ),
            Mutation::MarkSeen(params) => Committed::Seen(
                self.store
                    .mark_seen(params)
                    .await
                    .map_err(|err| AppError::from_repo(target, err))?,
            ),
        };

        if !self.tasks.submit(TaskKind::FanOut(committed.clone())) {
            debug!(partition = %committed.partition(), "Fan-out skipped; cache converges on next rebuild");
        }
        Ok(committed)
    }
}

#[derive(Debug, Error)]
enum FanOutError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to encode cache payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store refresh failed: {0}")]
    Store(#[from] RepoError),
}

/// Applies the post-commit side effects of a [`Committed`] write.
pub struct FanOut {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn DurableStore>,
    index: Arc<OrderedIndex>,
}

impl FanOut {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
        index: Arc<OrderedIndex>,
    ) -> Self {
        Self {
            cache,
            store,
            index,
        }
    }

    #[instrument(skip(self, committed), fields(partition = %committed.partition()))]
    pub async fn apply(&self, committed: &Committed) {
        match committed {
            Committed::Message(stored) => self.message(stored).await,
            Committed::Post(post) => self.post(post).await,
            Committed::Comment(stored) => self.comment(stored).await,
            Committed::Like(like) => self.like(like).await,
            Committed::Seen(update) => self.seen(update).await,
        }
    }

    async fn message(&self, stored: &StoredMessage) {
        let StoredMessage {
            message,
            conversation,
        } = stored;

        record("cache_message", self.put(&Entity::Message(message.clone())).await);
        record(
            "cache_conversation",
            self.put(&Entity::Conversation(conversation.clone())).await,
        );
        record(
            "append_message",
            self.append(
                Container::conversation_messages(message.conversation_id),
                message.index_entry(),
            )
            .await,
        );
        let activity = conversation.activity_entry();
        for user_id in conversation.participant_ids() {
            record(
                "append_activity",
                self.append(Container::user_conversations(user_id), activity)
                    .await,
            );
        }

        let event = RealtimeEvent::MessageCreated {
            message: message.clone(),
        };
        record(
            "publish",
            self.publish(&conversation_channel(message.conversation_id), &event)
                .await,
        );
        for user_id in conversation.participant_ids() {
            record("publish", self.publish(&user_channel(user_id), &event).await);
        }
    }

    async fn post(&self, post: &PostRecord) {
        record("cache_post", self.put(&Entity::Post(post.clone())).await);
        record(
            "append_post",
            self.append(Container::network_posts(post.network_id), post.index_entry())
                .await,
        );
        let event = RealtimeEvent::PostCreated { post: post.clone() };
        record(
            "publish",
            self.publish(&network_channel(post.network_id), &event)
                .await,
        );
    }

    async fn comment(&self, stored: &StoredComment) {
        let comment = &stored.comment;
        record(
            "cache_comment",
            self.put(&Entity::Comment(comment.clone())).await,
        );
        record(
            "append_comment",
            self.append(Container::post_comments(comment.post_id), comment.index_entry())
                .await,
        );
        record("refresh_post", self.refresh_post(comment.post_id).await);

        if stored.post_author_id != comment.author_id {
            let event = RealtimeEvent::CommentCreated {
                comment: comment.clone(),
            };
            record(
                "publish",
                self.publish(&user_channel(stored.post_author_id), &event)
                    .await,
            );
        }
    }

    async fn like(&self, like: &StoredLike) {
        record("refresh_post", self.refresh_post(like.post_id).await);
        if like.inserted && like.post_author_id != like.user_id {
            let event = RealtimeEvent::PostLiked {
                post_id: like.post_id,
                user_id: like.user_id,
            };
            record(
                "publish",
                self.publish(&user_channel(like.post_author_id), &event)
                    .await,
            );
        }
    }

    async fn seen(&self, update: &SeenUpdate) {
        record(
            "cache_watermark",
            self.cache
                .set_max(
                    &watermark_key(update.user_id, update.conversation_id),
                    update.watermark,
                )
                .await
                .map(|_| ())
                .map_err(FanOutError::from),
        );
        record(
            "refresh_seen_messages",
            self.refresh_seen_messages(&update.newly_seen).await,
        );

        let event = RealtimeEvent::MessagesSeen {
            conversation_id: update.conversation_id,
            user_id: update.user_id,
            watermark: update.watermark,
        };
        record(
            "publish",
            self.publish(&conversation_channel(update.conversation_id), &event)
                .await,
        );
    }

    async fn put(&self, entity: &Entity) -> Result<(), FanOutError> {
        let payload = encode_entity(entity)?;
        self.cache.set(&record_key(&entity.key()), &payload).await?;
        Ok(())
    }

    async fn append(
        &self,
        container: Container,
        entry: IndexEntry,
    ) -> Result<(), FanOutError> {
        self.index.append(container, entry).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, event: &RealtimeEvent) -> Result<(), FanOutError> {
        let payload = serde_json::to_string(event)?;
        self.cache.publish(channel, &payload).await?;
        Ok(())
    }

    /// Replace the cached post with a fresh store read so derived counters
    /// are never adjusted in place.
    async fn refresh_post(&self, post_id: i64) -> Result<(), FanOutError> {
        let key = EntityKey::new(EntityKind::Post, post_id);
        match self.store.find_entity(key).await? {
            Some(entity) => self.put(&entity).await,
            None => Ok(()),
        }
    }

    /// Overwrite newly seen messages with fresh store reads, cached or not,
    /// so a populate queued before the commit cannot bring back `seen = false`.
    async fn refresh_seen_messages(&self, ids: &[i64]) -> Result<(), FanOutError> {
        if ids.is_empty() {
            return Ok(());
        }
        let messages = self.store.find_entities(EntityKind::Message, ids).await?;
        let mut updates = Vec::with_capacity(messages.len());
        for message in &messages {
            updates.push((record_key(&message.key()), encode_entity(message)?));
        }
        if !updates.is_empty() {
            self.cache.set_many(&updates).await?;
        }
        Ok(())
    }
}

fn record(step: &'static str, result: Result<(), FanOutError>) {
    if let Err(err) = result {
        warn!(step, error = %err, "Fan-out step failed");
        counter!("chorus_fanout_failure_total", "step" => step).increment(1);
    }
}
