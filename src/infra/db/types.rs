use crate::application::repos::RepoError;
use crate::domain::entities::{
    CommentRecord, ConversationRecord, MessageRecord, ParticipantRecord, PostRecord,
    UserProfileRecord, timestamp_from_ms,
};

use super::util::convert_count;

fn stored_timestamp(ms: i64) -> Result<time::OffsetDateTime, RepoError> {
    timestamp_from_ms(ms).map_err(|err| RepoError::integrity(err.to_string()))
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body, created_at_ms, seen";

#[derive(sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub(crate) id: i64,
    pub(crate) conversation_id: i64,
    pub(crate) sender_id: i64,
    pub(crate) body: String,
    pub(crate) created_at_ms: i64,
    pub(crate) seen: bool,
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = RepoError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            body: row.body,
            created_at: stored_timestamp(row.created_at_ms)?,
            seen: row.seen,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConversationRow {
    pub(crate) id: i64,
    pub(crate) last_activity_ms: i64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ParticipantRow {
    pub(crate) conversation_id: i64,
    pub(crate) user_id: i64,
    pub(crate) muted: bool,
}

impl ConversationRow {
    /// Attach the participants belonging to this conversation.
    pub(crate) fn with_participants(
        self,
        participants: &[ParticipantRow],
    ) -> Result<ConversationRecord, RepoError> {
        Ok(ConversationRecord {
            id: self.id,
            participants: participants
                .iter()
                .filter(|row| row.conversation_id == self.id)
                .map(|row| ParticipantRecord {
                    user_id: row.user_id,
                    muted: row.muted,
                })
                .collect(),
            last_activity_at: stored_timestamp(self.last_activity_ms)?,
        })
    }
}

/// Post columns with derived counters, for a `posts p` source.
pub(crate) const POST_COLUMNS: &str = "p.id, p.author_id, p.network_id, p.body, p.images, p.created_at_ms, \
    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count, \
    (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS like_count";

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) id: i64,
    pub(crate) author_id: i64,
    pub(crate) network_id: i64,
    pub(crate) body: String,
    pub(crate) images: Vec<String>,
    pub(crate) created_at_ms: i64,
    pub(crate) comment_count: i64,
    pub(crate) like_count: i64,
}

impl TryFrom<PostRow> for PostRecord {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            author_id: row.author_id,
            network_id: row.network_id,
            body: row.body,
            images: row.images,
            created_at: stored_timestamp(row.created_at_ms)?,
            comment_count: convert_count(row.comment_count)?,
            like_count: convert_count(row.like_count)?,
        })
    }
}

pub(crate) const COMMENT_COLUMNS: &str = "id, post_id, author_id, body, created_at_ms";

#[derive(sqlx::FromRow)]
pub(crate) struct CommentRow {
    pub(crate) id: i64,
    pub(crate) post_id: i64,
    pub(crate) author_id: i64,
    pub(crate) body: String,
    pub(crate) created_at_ms: i64,
}

impl TryFrom<CommentRow> for CommentRecord {
    type Error = RepoError;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            body: row.body,
            created_at: stored_timestamp(row.created_at_ms)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserProfileRow {
    pub(crate) id: i64,
    pub(crate) display_name: String,
    pub(crate) avatar_url: Option<String>,
}

impl From<UserProfileRow> for UserProfileRecord {
    fn from(row: UserProfileRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}
