use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;

use crate::application::repos::{
    LikePostParams, MarkSeenParams, MutationsRepo, NewCommentParams, NewMessageParams,
    NewPostParams, RepoError, SeenUpdate, StoredComment, StoredLike, StoredMessage,
};
use crate::domain::entities::{CommentRecord, MessageRecord, PostRecord, timestamp_ms};

use super::PostgresRepositories;
use super::types::{
    COMMENT_COLUMNS, CommentRow, ConversationRow, MESSAGE_COLUMNS, MessageRow, ParticipantRow,
};
use super::util::map_sqlx_error;

fn now_ms() -> i64 {
    timestamp_ms(OffsetDateTime::now_utc())
}

async fn post_author(
    tx: &mut Transaction<'_, Postgres>,
    post_id: i64,
) -> Result<i64, RepoError> {
    sqlx::query_scalar::<_, i64>("SELECT author_id FROM posts WHERE id = $1 FOR SHARE")
        .bind(post_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)
}

#[async_trait]
impl MutationsRepo for PostgresRepositories {
    async fn insert_message(&self, params: NewMessageParams) -> Result<StoredMessage, RepoError> {
        let NewMessageParams {
            conversation_id,
            sender_id,
            body,
        } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let conversation = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, last_activity_ms FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT conversation_id, user_id, muted FROM conversation_participants \
             WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(conversation_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if !participants.iter().any(|row| row.user_id == sender_id) {
            return Err(RepoError::InvalidInput {
                message: format!(
                    "user {sender_id} is not a participant of conversation {conversation_id}"
                ),
            });
        }

        // Timestamps never run backwards within one conversation.
        let created_at_ms = now_ms().max(conversation.last_activity_ms);
        let message = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (conversation_id, sender_id, body, created_at_ms) \
             VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&body)
        .bind(created_at_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let conversation = sqlx::query_as::<_, ConversationRow>(
            "UPDATE conversations SET last_activity_ms = GREATEST(last_activity_ms, $2) \
             WHERE id = $1 RETURNING id, last_activity_ms",
        )
        .bind(conversation.id)
        .bind(created_at_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(StoredMessage {
            message: MessageRecord::try_from(message)?,
            conversation: conversation.with_participants(&participants)?,
        })
    }

    async fn insert_post(&self, params: NewPostParams) -> Result<PostRecord, RepoError> {
        let NewPostParams {
            author_id,
            network_id,
            body,
            images,
        } = params;

        let created_at_ms = now_ms();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO posts (author_id, network_id, body, images, created_at_ms) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(author_id)
        .bind(network_id)
        .bind(&body)
        .bind(&images)
        .bind(created_at_ms)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        self.load_posts(&[id])
            .await?
            .pop()
            .ok_or_else(|| RepoError::integrity(format!("post {id} vanished after insert")))
    }

    async fn insert_comment(&self, params: NewCommentParams) -> Result<StoredComment, RepoError> {
        let NewCommentParams {
            post_id,
            author_id,
            body,
        } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let post_author_id = post_author(&mut tx, post_id).await?;

        let comment = sqlx::query_as::<_, CommentRow>(&format!(
            "INSERT INTO comments (post_id, author_id, body, created_at_ms) \
             VALUES ($1, $2, $3, $4) RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(post_id)
        .bind(author_id)
        .bind(&body)
        .bind(now_ms())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(StoredComment {
            comment: CommentRecord::try_from(comment)?,
            post_author_id,
        })
    }

    async fn like_post(&self, params: LikePostParams) -> Result<StoredLike, RepoError> {
        let LikePostParams { post_id, user_id } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let post_author_id = post_author(&mut tx, post_id).await?;

        let inserted = sqlx::query(
            "INSERT INTO post_likes (post_id, user_id, created_at_ms) VALUES ($1, $2, $3) \
             ON CONFLICT (post_id, user_id) DO NOTHING",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(now_ms())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected()
            > 0;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(StoredLike {
            post_id,
            user_id,
            post_author_id,
            inserted,
        })
    }

    async fn mark_seen(&self, params: MarkSeenParams) -> Result<SeenUpdate, RepoError> {
        let MarkSeenParams {
            user_id,
            conversation_id,
            up_to,
        } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // The watermark never moves backwards and never passes the newest message.
        let watermark = sqlx::query_scalar::<_, i64>(
            "UPDATE conversation_participants \
             SET seen_watermark = GREATEST(seen_watermark, LEAST($3, \
                 (SELECT COALESCE(MAX(id), 0) FROM messages WHERE conversation_id = $1))) \
             WHERE conversation_id = $1 AND user_id = $2 \
             RETURNING seen_watermark",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(up_to)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let mut newly_seen = sqlx::query_scalar::<_, i64>(
            "UPDATE messages SET seen = TRUE \
             WHERE conversation_id = $1 AND sender_id <> $2 AND id <= $3 AND NOT seen \
             RETURNING id",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(watermark)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        newly_seen.sort_unstable();

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(SeenUpdate {
            user_id,
            conversation_id,
            watermark,
            newly_seen,
        })
    }
}
