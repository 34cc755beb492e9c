use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::application::repos::{IndexRepo, RepoError, StoreBoundary};
use crate::domain::types::{Container, ContainerKind, IndexEntry};

use super::PostgresRepositories;
use super::util::{convert_count, map_sqlx_error, sql_limit};

/// Where a container's members live and how they are scored.
struct IndexSource {
    from: &'static str,
    owner: &'static str,
    member: &'static str,
    score: &'static str,
}

fn source(kind: ContainerKind) -> IndexSource {
    match kind {
        ContainerKind::ConversationMessages => IndexSource {
            from: "messages m",
            owner: "m.conversation_id",
            member: "m.id",
            score: "m.created_at_ms",
        },
        ContainerKind::NetworkPosts => IndexSource {
            from: "posts p",
            owner: "p.network_id",
            member: "p.id",
            score: "p.created_at_ms",
        },
        ContainerKind::PostComments => IndexSource {
            from: "comments c",
            owner: "c.post_id",
            member: "c.id",
            score: "c.created_at_ms",
        },
        ContainerKind::UserConversations => IndexSource {
            from: "conversation_participants cp \
                   INNER JOIN conversations cv ON cv.id = cp.conversation_id",
            owner: "cp.user_id",
            member: "cv.id",
            score: "cv.last_activity_ms",
        },
    }
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    member: i64,
    score: i64,
}

#[async_trait]
impl IndexRepo for PostgresRepositories {
    async fn page_index(
        &self,
        container: Container,
        boundary: StoreBoundary,
        limit: u64,
    ) -> Result<Vec<IndexEntry>, RepoError> {
        let source = source(container.kind);
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {member} AS member, {score} AS score FROM {from} WHERE {owner} = ",
            member = source.member,
            score = source.score,
            from = source.from,
            owner = source.owner,
        ));
        qb.push_bind(container.id);

        let offset = match boundary {
            StoreBoundary::Offset(offset) => offset,
            StoreBoundary::Before(cursor) => {
                qb.push(format!(" AND ({}, {}) < (", source.score, source.member));
                qb.push_bind(cursor.score());
                qb.push(", ");
                qb.push_bind(cursor.member().unwrap_or(i64::MIN));
                qb.push(")");
                0
            }
            StoreBoundary::After(cursor) => {
                qb.push(format!(" AND ({}, {}) > (", source.score, source.member));
                qb.push_bind(cursor.score());
                qb.push(", ");
                qb.push_bind(cursor.member().unwrap_or(i64::MAX));
                qb.push(")");
                0
            }
        };

        qb.push(format!(
            " ORDER BY {} DESC, {} DESC LIMIT ",
            source.score, source.member
        ));
        qb.push_bind(sql_limit(limit));
        qb.push(" OFFSET ");
        qb.push_bind(sql_limit(offset));

        let rows = qb
            .build_query_as::<IndexRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| IndexEntry::new(row.member, row.score))
            .collect())
    }

    async fn count_index(&self, container: Container) -> Result<u64, RepoError> {
        let source = source(container.kind);
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            source.from, source.owner
        ))
        .bind(container.id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        convert_count(count)
    }
}
