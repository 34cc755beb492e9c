//! Shared domain identifiers: entity kinds, containers and ordered index entries.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    Post,
    Comment,
    Conversation,
    UserProfile,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Message => "message",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::Conversation => "conversation",
            EntityKind::UserProfile => "user",
        }
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "message" => Ok(EntityKind::Message),
            "post" => Ok(EntityKind::Post),
            "comment" => Ok(EntityKind::Comment),
            "conversation" => Ok(EntityKind::Conversation),
            "user" => Ok(EntityKind::UserProfile),
            other => Err(DomainError::validation(format!(
                "unknown entity kind `{other}`"
            ))),
        }
    }
}

/// Identifies one entity by kind and numeric ID. Displays as `{kind}:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for EntityKey {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("malformed entity key `{value}`")))?;
        Ok(Self::new(kind.parse()?, parse_id(id, value)?))
    }
}

/// The kind of ordered index a container owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Messages of one conversation, scored by message timestamp.
    ConversationMessages,
    /// Posts of one network, scored by post timestamp.
    NetworkPosts,
    /// Comments of one post, scored by comment timestamp.
    PostComments,
    /// Conversations of one user, scored by the conversation's last activity.
    UserConversations,
}

impl ContainerKind {
    fn owner(self) -> &'static str {
        match self {
            ContainerKind::ConversationMessages => "conversation",
            ContainerKind::NetworkPosts => "network",
            ContainerKind::PostComments => "post",
            ContainerKind::UserConversations => "user",
        }
    }

    fn members(self) -> &'static str {
        match self {
            ContainerKind::ConversationMessages => "messages",
            ContainerKind::NetworkPosts => "posts",
            ContainerKind::PostComments => "comments",
            ContainerKind::UserConversations => "conversations",
        }
    }

    /// Entity kind of the members held by this index.
    pub fn member_kind(self) -> EntityKind {
        match self {
            ContainerKind::ConversationMessages => EntityKind::Message,
            ContainerKind::NetworkPosts => EntityKind::Post,
            ContainerKind::PostComments => EntityKind::Comment,
            ContainerKind::UserConversations => EntityKind::Conversation,
        }
    }
}

/// A logical grouping owning exactly one ordered index instance.
///
/// Displays as `{owner}:{id}:{members}`, e.g. `conversation:7:messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Container {
    pub kind: ContainerKind,
    pub id: i64,
}

impl Container {
    pub fn new(kind: ContainerKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn conversation_messages(conversation_id: i64) -> Self {
        Self::new(ContainerKind::ConversationMessages, conversation_id)
    }

    pub fn network_posts(network_id: i64) -> Self {
        Self::new(ContainerKind::NetworkPosts, network_id)
    }

    pub fn post_comments(post_id: i64) -> Self {
        Self::new(ContainerKind::PostComments, post_id)
    }

    pub fn user_conversations(user_id: i64) -> Self {
        Self::new(ContainerKind::UserConversations, user_id)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.kind.owner(),
            self.id,
            self.kind.members()
        )
    }
}

impl FromStr for Container {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(3, ':');
        let (Some(owner), Some(id), Some(members)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::validation(format!(
                "malformed container `{value}`"
            )));
        };

        let kind = match (owner, members) {
            ("conversation", "messages") => ContainerKind::ConversationMessages,
            ("network", "posts") => ContainerKind::NetworkPosts,
            ("post", "comments") => ContainerKind::PostComments,
            ("user", "conversations") => ContainerKind::UserConversations,
            _ => {
                return Err(DomainError::validation(format!(
                    "unknown container `{value}`"
                )));
            }
        };

        Ok(Self::new(kind, parse_id(id, value)?))
    }
}

/// One member of an ordered index with its score (Unix milliseconds).
///
/// The natural ordering is newest-first: higher score first, and for equal
/// scores the higher member ID first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub member: i64,
    pub score: i64,
}

impl IndexEntry {
    pub fn new(member: i64, score: i64) -> Self {
        Self { member, score }
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.member.cmp(&self.member))
    }
}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn parse_id(raw: &str, whole: &str) -> Result<i64, DomainError> {
    let id: i64 = raw
        .parse()
        .map_err(|_| DomainError::validation(format!("invalid id in `{whole}`")))?;
    if id <= 0 {
        return Err(DomainError::validation(format!(
            "id must be positive in `{whole}`"
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_display_and_parse_agree() {
        let container = Container::conversation_messages(7);
        assert_eq!(container.to_string(), "conversation:7:messages");
        assert_eq!(
            "conversation:7:messages".parse::<Container>().expect("parse"),
            container
        );
        assert_eq!(
            "user:3:conversations".parse::<Container>().expect("parse"),
            Container::user_conversations(3)
        );
    }

    #[test]
    fn container_parse_rejects_mismatched_members() {
        assert!("conversation:7:posts".parse::<Container>().is_err());
        assert!("network:x:posts".parse::<Container>().is_err());
        assert!("network:0:posts".parse::<Container>().is_err());
        assert!("network:5".parse::<Container>().is_err());
    }

    #[test]
    fn entity_key_uses_type_namespace() {
        let key = EntityKey::new(EntityKind::UserProfile, 42);
        assert_eq!(key.to_string(), "user:42");
        assert_eq!("message:12".parse::<EntityKey>().expect("parse").id, 12);
    }

    #[test]
    fn index_entries_sort_newest_first_with_id_tiebreak() {
        let mut entries = vec![
            IndexEntry::new(10, 1_000),
            IndexEntry::new(12, 3_000),
            IndexEntry::new(11, 3_000),
            IndexEntry::new(9, 2_000),
        ];
        entries.sort();
        let members: Vec<i64> = entries.iter().map(|entry| entry.member).collect();
        assert_eq!(members, vec![12, 11, 9, 10]);
    }
}
