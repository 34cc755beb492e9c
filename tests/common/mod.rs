//! Shared fixtures for integration tests: an in-memory durable store, a cache
//! backend that always fails, and a harness assembling the core.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chorus::application::CacheCore;
use chorus::application::repos::{
    EntitiesRepo, IndexRepo, LikePostParams, MarkSeenParams, MutationsRepo, NewCommentParams,
    NewMessageParams, NewPostParams, RepoError, SeenUpdate, StoreBoundary, StoredComment,
    StoredLike, StoredMessage,
};
use chorus::cache::keys::{index_count_key, index_key};
use chorus::cache::{
    AppendOutcome, CacheBackend, CacheConfig, CacheError, IndexHorizons, MemoryCache, QueueConfig,
    ScoreBound,
};
use chorus::domain::entities::{
    CommentRecord, ConversationRecord, Entity, MessageRecord, ParticipantRecord, PostRecord,
    UserProfileRecord, timestamp_from_ms,
};
use chorus::domain::types::{Container, ContainerKind, EntityKey, EntityKind, IndexEntry};

pub const BASE_MS: i64 = 1_700_000_000_000;

pub fn horizons(horizon: u32) -> IndexHorizons {
    IndexHorizons::uniform(NonZeroU32::new(horizon).expect("non-zero horizon"))
}

#[derive(Clone)]
struct StoredPost {
    author_id: i64,
    network_id: i64,
    body: String,
    images: Vec<String>,
    created_at_ms: i64,
}

#[derive(Clone)]
struct StoredConversation {
    participants: Vec<ParticipantRecord>,
    last_activity_ms: i64,
    watermarks: BTreeMap<i64, i64>,
}

#[derive(Default)]
struct State {
    clock_ms: i64,
    next_id: i64,
    users: BTreeMap<i64, UserProfileRecord>,
    conversations: BTreeMap<i64, StoredConversation>,
    messages: BTreeMap<i64, MessageRecord>,
    posts: BTreeMap<i64, StoredPost>,
    comments: BTreeMap<i64, CommentRecord>,
    likes: BTreeSet<(i64, i64)>,
}

impl State {
    fn tick(&mut self) -> i64 {
        self.clock_ms += 1_000;
        self.clock_ms
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn observe(&mut self, id: i64, at_ms: i64) {
        self.next_id = self.next_id.max(id);
        self.clock_ms = self.clock_ms.max(at_ms);
    }

    fn post(&self, id: i64) -> Option<PostRecord> {
        let post = self.posts.get(&id)?;
        Some(PostRecord {
            id,
            author_id: post.author_id,
            network_id: post.network_id,
            body: post.body.clone(),
            images: post.images.clone(),
            created_at: timestamp_from_ms(post.created_at_ms).expect("valid timestamp"),
            comment_count: self
                .comments
                .values()
                .filter(|comment| comment.post_id == id)
                .count() as u64,
            like_count: self.likes.iter().filter(|(post, _)| *post == id).count() as u64,
        })
    }

    fn conversation(&self, id: i64) -> Option<ConversationRecord> {
        let conversation = self.conversations.get(&id)?;
        Some(ConversationRecord {
            id,
            participants: conversation.participants.clone(),
            last_activity_at: timestamp_from_ms(conversation.last_activity_ms)
                .expect("valid timestamp"),
        })
    }

    fn entries(&self, container: Container) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = match container.kind {
            ContainerKind::ConversationMessages => self
                .messages
                .values()
                .filter(|message| message.conversation_id == container.id)
                .map(MessageRecord::index_entry)
                .collect(),
            ContainerKind::NetworkPosts => self
                .posts
                .iter()
                .filter(|(_, post)| post.network_id == container.id)
                .map(|(id, post)| IndexEntry::new(*id, post.created_at_ms))
                .collect(),
            ContainerKind::PostComments => self
                .comments
                .values()
                .filter(|comment| comment.post_id == container.id)
                .map(CommentRecord::index_entry)
                .collect(),
            ContainerKind::UserConversations => self
                .conversations
                .iter()
                .filter(|(_, conversation)| {
                    conversation
                        .participants
                        .iter()
                        .any(|participant| participant.user_id == container.id)
                })
                .map(|(id, conversation)| IndexEntry::new(*id, conversation.last_activity_ms))
                .collect(),
        };
        entries.sort();
        entries
    }
}

/// In-memory durable store with call counters and an outage switch.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    entity_reads: AtomicUsize,
    page_reads: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        let store = Self::default();
        store.lock().clock_ms = BASE_MS;
        Arc::new(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store state lock")
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Entity lookups served so far.
    pub fn entity_reads(&self) -> usize {
        self.entity_reads.load(Ordering::SeqCst)
    }

    /// Index pages served so far.
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::SeqCst)
    }

    pub fn add_user(&self, id: i64, display_name: &str) {
        let mut state = self.lock();
        state.users.insert(
            id,
            UserProfileRecord {
                id,
                display_name: display_name.to_string(),
                avatar_url: None,
            },
        );
        state.observe(id, 0);
    }

    pub fn add_conversation(&self, id: i64, participants: &[i64]) {
        let mut state = self.lock();
        let last_activity_ms = state.clock_ms;
        state.conversations.insert(
            id,
            StoredConversation {
                participants: participants
                    .iter()
                    .map(|user_id| ParticipantRecord {
                        user_id: *user_id,
                        muted: false,
                    })
                    .collect(),
                last_activity_ms,
                watermarks: BTreeMap::new(),
            },
        );
        state.observe(id, 0);
    }

    /// Insert a message with an explicit ID and timestamp.
    pub fn seed_message(&self, conversation_id: i64, id: i64, sender_id: i64, at_ms: i64) {
        let mut state = self.lock();
        state.messages.insert(
            id,
            MessageRecord {
                id,
                conversation_id,
                sender_id,
                body: format!("message {id}"),
                created_at: timestamp_from_ms(at_ms).expect("valid timestamp"),
                seen: false,
            },
        );
        if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
            conversation.last_activity_ms = conversation.last_activity_ms.max(at_ms);
        }
        state.observe(id, at_ms);
    }

    pub fn seed_post(&self, network_id: i64, id: i64, author_id: i64, at_ms: i64) {
        let mut state = self.lock();
        state.posts.insert(
            id,
            StoredPost {
                author_id,
                network_id,
                body: format!("post {id}"),
                images: Vec::new(),
                created_at_ms: at_ms,
            },
        );
        state.observe(id, at_ms);
    }

    pub fn seed_comment(&self, post_id: i64, id: i64, author_id: i64, at_ms: i64) {
        let mut state = self.lock();
        state.comments.insert(
            id,
            CommentRecord {
                id,
                post_id,
                author_id,
                body: format!("comment {id}"),
                created_at: timestamp_from_ms(at_ms).expect("valid timestamp"),
            },
        );
        state.observe(id, at_ms);
    }

    pub fn set_watermark(&self, user_id: i64, conversation_id: i64, watermark: i64) {
        let mut state = self.lock();
        if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
            conversation.watermarks.insert(user_id, watermark);
        }
    }

    pub fn message(&self, id: i64) -> Option<MessageRecord> {
        self.lock().messages.get(&id).cloned()
    }

    pub fn post(&self, id: i64) -> Option<PostRecord> {
        self.lock().post(id)
    }

    /// The store's own answer for a page, bypassing the counters.
    pub fn expected_page(
        &self,
        container: Container,
        boundary: StoreBoundary,
        limit: u64,
    ) -> Vec<IndexEntry> {
        page(&self.lock(), container, boundary, limit)
    }
}

fn page(state: &State, container: Container, boundary: StoreBoundary, limit: u64) -> Vec<IndexEntry> {
    let entries = state.entries(container);
    let limit = limit as usize;
    match boundary {
        StoreBoundary::Offset(offset) => entries
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect(),
        StoreBoundary::Before(cursor) => entries
            .into_iter()
            .filter(|entry| cursor.is_before(entry))
            .take(limit)
            .collect(),
        StoreBoundary::After(cursor) => entries
            .into_iter()
            .filter(|entry| cursor.is_after(entry))
            .take(limit)
            .collect(),
    }
}

#[async_trait]
impl EntitiesRepo for FakeStore {
    async fn find_entity(&self, key: EntityKey) -> Result<Option<Entity>, RepoError> {
        let mut found = self.find_entities(key.kind, &[key.id]).await?;
        Ok(found.pop())
    }

    async fn find_entities(
        &self,
        kind: EntityKind,
        ids: &[i64],
    ) -> Result<Vec<Entity>, RepoError> {
        self.check()?;
        self.entity_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| match kind {
                EntityKind::Message => state.messages.get(id).cloned().map(Entity::Message),
                EntityKind::Post => state.post(*id).map(Entity::Post),
                EntityKind::Comment => state.comments.get(id).cloned().map(Entity::Comment),
                EntityKind::Conversation => state.conversation(*id).map(Entity::Conversation),
                EntityKind::UserProfile => state.users.get(id).cloned().map(Entity::UserProfile),
            })
            .collect())
    }

    async fn seen_watermark(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<Option<i64>, RepoError> {
        self.check()?;
        let state = self.lock();
        Ok(state
            .conversations
            .get(&conversation_id)
            .and_then(|conversation| conversation.watermarks.get(&user_id).copied()))
    }

    async fn count_unseen(
        &self,
        user_id: i64,
        conversation_id: i64,
        watermark: i64,
    ) -> Result<u64, RepoError> {
        self.check()?;
        let state = self.lock();
        Ok(state
            .messages
            .values()
            .filter(|message| {
                message.conversation_id == conversation_id
                    && message.id > watermark
                    && message.sender_id != user_id
            })
            .count() as u64)
    }
}

#[async_trait]
impl IndexRepo for FakeStore {
    async fn page_index(
        &self,
        container: Container,
        boundary: StoreBoundary,
        limit: u64,
    ) -> Result<Vec<IndexEntry>, RepoError> {
        self.check()?;
        self.page_reads.fetch_add(1, Ordering::SeqCst);
        Ok(page(&self.lock(), container, boundary, limit))
    }

    async fn count_index(&self, container: Container) -> Result<u64, RepoError> {
        self.check()?;
        Ok(self.lock().entries(container).len() as u64)
    }
}

#[async_trait]
impl MutationsRepo for FakeStore {
    async fn insert_message(&self, params: NewMessageParams) -> Result<StoredMessage, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let Some(conversation) = state.conversations.get(&params.conversation_id) else {
            return Err(RepoError::NotFound);
        };
        if !conversation
            .participants
            .iter()
            .any(|participant| participant.user_id == params.sender_id)
        {
            return Err(RepoError::InvalidInput {
                message: "sender is not a participant".to_string(),
            });
        }

        let id = state.allocate_id();
        let at_ms = state.tick();
        let message = MessageRecord {
            id,
            conversation_id: params.conversation_id,
            sender_id: params.sender_id,
            body: params.body,
            created_at: timestamp_from_ms(at_ms).expect("valid timestamp"),
            seen: false,
        };
        state.messages.insert(id, message.clone());
        if let Some(conversation) = state.conversations.get_mut(&params.conversation_id) {
            conversation.last_activity_ms = at_ms;
        }
        let conversation = state
            .conversation(params.conversation_id)
            .ok_or(RepoError::NotFound)?;
        Ok(StoredMessage {
            message,
            conversation,
        })
    }

    async fn insert_post(&self, params: NewPostParams) -> Result<PostRecord, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let id = state.allocate_id();
        let at_ms = state.tick();
        state.posts.insert(
            id,
            StoredPost {
                author_id: params.author_id,
                network_id: params.network_id,
                body: params.body,
                images: params.images,
                created_at_ms: at_ms,
            },
        );
        state.post(id).ok_or(RepoError::NotFound)
    }

    async fn insert_comment(&self, params: NewCommentParams) -> Result<StoredComment, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let post_author_id = state
            .posts
            .get(&params.post_id)
            .map(|post| post.author_id)
            .ok_or(RepoError::NotFound)?;
        let id = state.allocate_id();
        let at_ms = state.tick();
        let comment = CommentRecord {
            id,
            post_id: params.post_id,
            author_id: params.author_id,
            body: params.body,
            created_at: timestamp_from_ms(at_ms).expect("valid timestamp"),
        };
        state.comments.insert(id, comment.clone());
        Ok(StoredComment {
            comment,
            post_author_id,
        })
    }

    async fn like_post(&self, params: LikePostParams) -> Result<StoredLike, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let post_author_id = state
            .posts
            .get(&params.post_id)
            .map(|post| post.author_id)
            .ok_or(RepoError::NotFound)?;
        let inserted = state.likes.insert((params.post_id, params.user_id));
        Ok(StoredLike {
            post_id: params.post_id,
            user_id: params.user_id,
            post_author_id,
            inserted,
        })
    }

    async fn mark_seen(&self, params: MarkSeenParams) -> Result<SeenUpdate, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let newest = state
            .messages
            .values()
            .filter(|message| message.conversation_id == params.conversation_id)
            .map(|message| message.id)
            .max()
            .unwrap_or(0);
        let conversation = state
            .conversations
            .get_mut(&params.conversation_id)
            .ok_or(RepoError::NotFound)?;
        let current = conversation
            .watermarks
            .get(&params.user_id)
            .copied()
            .unwrap_or(0);
        let watermark = current.max(params.up_to.min(newest));
        conversation.watermarks.insert(params.user_id, watermark);

        let mut newly_seen = Vec::new();
        for message in state.messages.values_mut() {
            if message.conversation_id == params.conversation_id
                && message.sender_id != params.user_id
                && message.id <= watermark
                && !message.seen
            {
                message.seen = true;
                newly_seen.push(message.id);
            }
        }
        Ok(SeenUpdate {
            user_id: params.user_id,
            conversation_id: params.conversation_id,
            watermark,
            newly_seen,
        })
    }
}

/// Backend whose every operation fails.
pub struct FailingCache;

fn down<T>() -> Result<T, CacheError> {
    Err(CacheError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        down()
    }

    async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        down()
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        down()
    }

    async fn set_many(&self, _entries: &[(String, String)]) -> Result<(), CacheError> {
        down()
    }

    async fn set_many_if_absent(&self, _entries: &[(String, String)]) -> Result<u64, CacheError> {
        down()
    }

    async fn replace_if_equals(
        &self,
        _key: &str,
        _expected: &str,
        _value: &str,
    ) -> Result<bool, CacheError> {
        down()
    }

    async fn set_max(&self, _key: &str, _value: i64) -> Result<i64, CacheError> {
        down()
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        down()
    }

    async fn index_len(&self, _index: &str) -> Result<u64, CacheError> {
        down()
    }

    async fn rev_range(
        &self,
        _index: &str,
        _start: u64,
        _count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        down()
    }

    async fn rev_range_by_score(
        &self,
        _index: &str,
        _max: ScoreBound,
        _min: ScoreBound,
        _offset: u64,
        _count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        down()
    }

    async fn append_if_exists(
        &self,
        _index: &str,
        _count_key: &str,
        _entry: IndexEntry,
        _horizon: u64,
    ) -> Result<AppendOutcome, CacheError> {
        down()
    }

    async fn replace_index(
        &self,
        _index: &str,
        _count_key: &str,
        _entries: &[IndexEntry],
        _cardinality: u64,
    ) -> Result<(), CacheError> {
        down()
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), CacheError> {
        down()
    }
}

pub fn queue_config() -> QueueConfig {
    QueueConfig {
        workers: 2,
        capacity: 256,
    }
}

/// Core over a fresh [`MemoryCache`] and [`FakeStore`].
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub cache: Arc<MemoryCache>,
    pub core: CacheCore,
}

impl Harness {
    pub fn new(horizon: u32) -> Self {
        Self::with_store(FakeStore::new(), horizon)
    }

    pub fn with_store(store: Arc<FakeStore>, horizon: u32) -> Self {
        let config = CacheConfig::memory(horizons(horizon));
        let cache = Arc::new(MemoryCache::new(&config));
        let core = CacheCore::new(cache.clone(), store.clone(), &config, queue_config());
        Self { store, cache, core }
    }

    /// Cached members of `container`, newest first.
    pub async fn cached_members(&self, container: Container) -> Vec<i64> {
        self.cache
            .rev_range(&index_key(&container), 0, 10_000)
            .await
            .expect("memory cache")
            .into_iter()
            .map(|entry| entry.member)
            .collect()
    }

    pub async fn cached_cardinality(&self, container: Container) -> Option<u64> {
        self.cache
            .get(&index_count_key(&container))
            .await
            .expect("memory cache")
            .map(|raw| raw.parse().expect("numeric cardinality"))
    }
}

/// Core over an arbitrary backend.
pub fn core_with(
    cache: Arc<dyn CacheBackend>,
    store: Arc<FakeStore>,
    horizon: u32,
) -> CacheCore {
    let config = CacheConfig::memory(horizons(horizon));
    CacheCore::new(cache, store, &config, queue_config())
}

/// Conversation 1 with users 1 and 2 and messages 10, 11, 12 one second apart.
pub fn seed_conversation(store: &FakeStore) {
    store.add_user(1, "Ada");
    store.add_user(2, "Grace");
    store.add_conversation(1, &[1, 2]);
    store.seed_message(1, 10, 2, BASE_MS + 10_000);
    store.seed_message(1, 11, 1, BASE_MS + 11_000);
    store.seed_message(1, 12, 2, BASE_MS + 12_000);
}
