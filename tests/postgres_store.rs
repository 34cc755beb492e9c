//! Store adapter tests against a real Postgres.
//!
//! - Marked `#[ignore]`; run with `DATABASE_URL` pointing at a scratch server.

use chorus::application::pagination::IndexCursor;
use chorus::application::repos::{
    EntitiesRepo, IndexRepo, LikePostParams, MarkSeenParams, MutationsRepo, NewCommentParams,
    NewMessageParams, NewPostParams, RepoError, StoreBoundary,
};
use chorus::domain::entities::Entity;
use chorus::domain::types::{Container, EntityKey, EntityKind};
use chorus::infra::db::PostgresRepositories;
use sqlx::PgPool;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

async fn seed(pool: &PgPool) -> TestResult<()> {
    sqlx::query(
        "INSERT INTO users (id, display_name, created_at_ms) VALUES \
         (1, 'Ada', 0), (2, 'Grace', 0), (3, 'Linus', 0)",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO networks (id, name) VALUES (7, 'general')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO conversations (id, last_activity_ms) VALUES (1, 0)")
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (1, 1), (1, 2)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn message(sender_id: i64, body: &str) -> NewMessageParams {
    NewMessageParams {
        conversation_id: 1,
        sender_id,
        body: body.to_string(),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn messages_page_newest_first(pool: PgPool) -> TestResult<()> {
    seed(&pool).await?;
    let repos = PostgresRepositories::new(pool);

    let mut ids = Vec::new();
    for body in ["one", "two", "three"] {
        let stored = repos.insert_message(message(1, body)).await?;
        ids.push(stored.message.id);
        assert!(stored.conversation.has_participant(2));
    }

    let container = Container::conversation_messages(1);
    assert_eq!(repos.count_index(container).await?, 3);

    let page = repos
        .page_index(container, StoreBoundary::Offset(0), 10)
        .await?;
    let members: Vec<i64> = page.iter().map(|entry| entry.member).collect();
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(members, expected);
    assert!(page.windows(2).all(|pair| pair[0].score >= pair[1].score));

    let older = repos
        .page_index(
            container,
            StoreBoundary::Before(IndexCursor::at_entry(page[0])),
            10,
        )
        .await?;
    assert_eq!(older, page[1..].to_vec());

    let newer = repos
        .page_index(
            container,
            StoreBoundary::After(IndexCursor::at_entry(page[2])),
            1,
        )
        .await?;
    assert_eq!(newer, vec![page[0]]);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn outsiders_cannot_post_messages(pool: PgPool) -> TestResult<()> {
    seed(&pool).await?;
    let repos = PostgresRepositories::new(pool);

    let err = repos
        .insert_message(message(3, "hi"))
        .await
        .expect_err("not a participant");
    assert!(matches!(err, RepoError::InvalidInput { .. }));

    let err = repos
        .insert_message(NewMessageParams {
            conversation_id: 99,
            sender_id: 1,
            body: "hi".to_string(),
        })
        .await
        .expect_err("no conversation");
    assert!(matches!(err, RepoError::NotFound));
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn post_counters_are_derived(pool: PgPool) -> TestResult<()> {
    seed(&pool).await?;
    let repos = PostgresRepositories::new(pool);

    let post = repos
        .insert_post(NewPostParams {
            author_id: 1,
            network_id: 7,
            body: "hello".to_string(),
            images: vec!["a.png".to_string()],
        })
        .await?;
    assert_eq!((post.comment_count, post.like_count), (0, 0));

    let stored = repos
        .insert_comment(NewCommentParams {
            post_id: post.id,
            author_id: 2,
            body: "nice".to_string(),
        })
        .await?;
    assert_eq!(stored.post_author_id, 1);

    let like = LikePostParams {
        post_id: post.id,
        user_id: 2,
    };
    assert!(repos.like_post(like).await?.inserted);
    assert!(!repos.like_post(like).await?.inserted);

    let Some(Entity::Post(reloaded)) = repos
        .find_entity(EntityKey::new(EntityKind::Post, post.id))
        .await?
    else {
        panic!("post should exist");
    };
    assert_eq!((reloaded.comment_count, reloaded.like_count), (1, 1));
    assert_eq!(reloaded.images, vec!["a.png".to_string()]);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn seen_watermark_is_clamped_and_monotonic(pool: PgPool) -> TestResult<()> {
    seed(&pool).await?;
    let repos = PostgresRepositories::new(pool);

    let first = repos.insert_message(message(2, "one")).await?.message.id;
    let own = repos.insert_message(message(1, "two")).await?.message.id;
    let last = repos.insert_message(message(2, "three")).await?.message.id;

    let update = repos
        .mark_seen(MarkSeenParams {
            user_id: 1,
            conversation_id: 1,
            up_to: last + 1_000,
        })
        .await?;
    assert_eq!(update.watermark, last);
    assert_eq!(update.newly_seen, vec![first, last]);
    assert!(!update.newly_seen.contains(&own));

    let lower = repos
        .mark_seen(MarkSeenParams {
            user_id: 1,
            conversation_id: 1,
            up_to: first,
        })
        .await?;
    assert_eq!(lower.watermark, last);
    assert!(lower.newly_seen.is_empty());

    assert_eq!(repos.seen_watermark(1, 1).await?, Some(last));
    assert_eq!(repos.count_unseen(1, 1, first).await?, 1);
    assert_eq!(repos.seen_watermark(3, 1).await?, None);
    Ok(())
}
