//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use super::error::DomainError;
use super::types::{EntityKey, EntityKind, IndexEntry};

/// Convert a stored Unix-millisecond timestamp into an `OffsetDateTime`.
pub fn timestamp_from_ms(ms: i64) -> Result<OffsetDateTime, DomainError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|err| DomainError::validation(format!("timestamp {ms} out of range: {err}")))
}

/// Unix milliseconds of `at`; this is the score used by ordered indices.
pub fn timestamp_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    #[serde(with = "time::serde::timestamp::milliseconds")]
    pub created_at: OffsetDateTime,
    pub seen: bool,
}

impl MessageRecord {
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry::new(self.id, timestamp_ms(self.created_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub user_id: i64,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub participants: Vec<ParticipantRecord>,
    #[serde(with = "time::serde::timestamp::milliseconds")]
    pub last_activity_at: OffsetDateTime,
}

impl ConversationRecord {
    /// Entry for this conversation in a participant's activity index.
    pub fn activity_entry(&self) -> IndexEntry {
        IndexEntry::new(self.id, timestamp_ms(self.last_activity_at))
    }

    pub fn participant_ids(&self) -> Vec<i64> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    pub fn has_participant(&self, user_id: i64) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

/// A post as served to readers.
///
/// `comment_count` and `like_count` are derived by the store at read time and
/// are never adjusted in place by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub author_id: i64,
    pub network_id: i64,
    pub body: String,
    pub images: Vec<String>,
    #[serde(with = "time::serde::timestamp::milliseconds")]
    pub created_at: OffsetDateTime,
    pub comment_count: u64,
    pub like_count: u64,
}

impl PostRecord {
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry::new(self.id, timestamp_ms(self.created_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub body: String,
    #[serde(with = "time::serde::timestamp::milliseconds")]
    pub created_at: OffsetDateTime,
}

impl CommentRecord {
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry::new(self.id, timestamp_ms(self.created_at))
    }
}

/// Read-mostly projection of a user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfileRecord {
    pub id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserProfileRecord {
    /// Stand-in for a profile that could not be resolved.
    pub fn placeholder(id: i64) -> Self {
        Self {
            id,
            display_name: "Unknown user".to_string(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Entity {
    Message(MessageRecord),
    Post(PostRecord),
    Comment(CommentRecord),
    Conversation(ConversationRecord),
    UserProfile(UserProfileRecord),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::Message(record) => EntityKey::new(EntityKind::Message, record.id),
            Entity::Post(record) => EntityKey::new(EntityKind::Post, record.id),
            Entity::Comment(record) => EntityKey::new(EntityKind::Comment, record.id),
            Entity::Conversation(record) => EntityKey::new(EntityKind::Conversation, record.id),
            Entity::UserProfile(record) => EntityKey::new(EntityKind::UserProfile, record.id),
        }
    }
}

/// A typed entity that can be cached under its canonical key.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> i64;

    fn from_entity(entity: Entity) -> Option<Self>;

    fn into_entity(self) -> Entity;

    fn key(&self) -> EntityKey {
        EntityKey::new(Self::KIND, self.id())
    }
}

macro_rules! impl_record {
    ($record:ty, $kind:ident) => {
        impl Record for $record {
            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> i64 {
                self.id
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$kind(record) => Some(record),
                    _ => None,
                }
            }

            fn into_entity(self) -> Entity {
                Entity::$kind(self)
            }
        }
    };
}

impl_record!(MessageRecord, Message);
impl_record!(PostRecord, Post);
impl_record!(CommentRecord, Comment);
impl_record!(ConversationRecord, Conversation);
impl_record!(UserProfileRecord, UserProfile);
