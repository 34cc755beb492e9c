use async_trait::async_trait;

use crate::application::repos::{EntitiesRepo, RepoError};
use crate::domain::entities::{
    CommentRecord, ConversationRecord, Entity, MessageRecord, PostRecord, UserProfileRecord,
};
use crate::domain::types::{EntityKey, EntityKind};

use super::PostgresRepositories;
use super::types::{
    COMMENT_COLUMNS, CommentRow, ConversationRow, MESSAGE_COLUMNS, MessageRow, POST_COLUMNS,
    ParticipantRow, PostRow, UserProfileRow,
};
use super::util::{convert_count, map_sqlx_error};

impl PostgresRepositories {
    pub(crate) async fn load_messages(&self, ids: &[i64]) -> Result<Vec<MessageRecord>, RepoError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(MessageRecord::try_from).collect()
    }

    pub(crate) async fn load_posts(&self, ids: &[i64]) -> Result<Vec<PostRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(PostRecord::try_from).collect()
    }

    pub(crate) async fn load_comments(&self, ids: &[i64]) -> Result<Vec<CommentRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(CommentRecord::try_from).collect()
    }

    pub(crate) async fn load_conversations(
        &self,
        ids: &[i64],
    ) -> Result<Vec<ConversationRecord>, RepoError> {
        let conversations = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, last_activity_ms FROM conversations WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if conversations.is_empty() {
            return Ok(Vec::new());
        }

        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT conversation_id, user_id, muted \
             FROM conversation_participants \
             WHERE conversation_id = ANY($1) \
             ORDER BY conversation_id, user_id",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        conversations
            .into_iter()
            .map(|row| row.with_participants(&participants))
            .collect()
    }

    async fn load_profiles(&self, ids: &[i64]) -> Result<Vec<UserProfileRecord>, RepoError> {
        let rows = sqlx::query_as::<_, UserProfileRow>(
            "SELECT id, display_name, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(UserProfileRecord::from).collect())
    }
}

#[async_trait]
impl EntitiesRepo for PostgresRepositories {
    async fn find_entity(&self, key: EntityKey) -> Result<Option<Entity>, RepoError> {
        let mut found = self.find_entities(key.kind, &[key.id]).await?;
        Ok(found.pop())
    }

    async fn find_entities(
        &self,
        kind: EntityKind,
        ids: &[i64],
    ) -> Result<Vec<Entity>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let entities = match kind {
            EntityKind::Message => self
                .load_messages(ids)
                .await?
                .into_iter()
                .map(Entity::Message)
                .collect(),
            EntityKind::Post => self
                .load_posts(ids)
                .await?
                .into_iter()
                .map(Entity::Post)
                .collect(),
            EntityKind::Comment => self
                .load_comments(ids)
                .await?
                .into_iter()
                .map(Entity::Comment)
                .collect(),
            EntityKind::Conversation => self
                .load_conversations(ids)
                .await?
                .into_iter()
                .map(Entity::Conversation)
                .collect(),
            EntityKind::UserProfile => self
                .load_profiles(ids)
                .await?
                .into_iter()
                .map(Entity::UserProfile)
                .collect(),
        };
        Ok(entities)
    }

    async fn seen_watermark(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<Option<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT seen_watermark FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn count_unseen(
        &self,
        user_id: i64,
        conversation_id: i64,
        watermark: i64,
    ) -> Result<u64, RepoError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND id > $2 AND sender_id <> $3",
        )
        .bind(conversation_id)
        .bind(watermark)
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        convert_count(count)
    }
}
