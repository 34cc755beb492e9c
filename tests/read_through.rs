mod common;

use std::sync::Arc;

use chorus::application::error::AppError;
use chorus::cache::CacheBackend;
use chorus::domain::entities::{MessageRecord, PostRecord, UserProfileRecord};
use chorus::domain::types::{Container, EntityKey, EntityKind};

use common::{BASE_MS, FailingCache, FakeStore, Harness, core_with, seed_conversation};

#[tokio::test]
async fn miss_is_served_by_store_then_cached() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);

    let message = harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");
    assert_eq!(Some(message.clone()), harness.store.message(10));
    assert_eq!(harness.store.entity_reads(), 1);

    harness.core.wait_idle().await;
    let cached = harness.cache.get("message:10").await.expect("cache get");
    assert!(cached.is_some());

    let again = harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");
    assert_eq!(again, message);
    assert_eq!(harness.store.entity_reads(), 1);
}

#[tokio::test]
async fn evicted_record_resolves_to_store_value() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);

    harness
        .core
        .resolve::<MessageRecord>(11)
        .await
        .expect("resolve");
    harness.core.wait_idle().await;
    harness.cache.evict("message:11");

    let message = harness
        .core
        .resolve::<MessageRecord>(11)
        .await
        .expect("resolve");
    assert_eq!(Some(message), harness.store.message(11));
    assert_eq!(harness.store.entity_reads(), 2);
}

#[tokio::test]
async fn missing_entity_is_not_found_and_final() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);

    let err = harness
        .core
        .resolve::<MessageRecord>(999)
        .await
        .expect_err("missing message");
    assert!(matches!(err, AppError::NotFound { entity: "message" }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn store_outage_is_retryable() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);
    harness.store.set_unavailable(true);

    let err = harness
        .core
        .resolve::<PostRecord>(3)
        .await
        .expect_err("store down");
    assert!(matches!(err, AppError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn failing_cache_is_invisible_to_readers() {
    let store = FakeStore::new();
    seed_conversation(&store);
    let core = core_with(Arc::new(FailingCache), store.clone(), 10);

    let message = core.resolve::<MessageRecord>(12).await.expect("resolve");
    assert_eq!(Some(message), store.message(12));

    let page = core
        .page(
            Container::conversation_messages(1),
            chorus::application::pagination::PageMode::start(),
            2,
        )
        .await
        .expect("page");
    assert_eq!(page, vec![12, 11]);

    let entity = core
        .resolver()
        .resolve_entity(EntityKey::new(EntityKind::UserProfile, 2))
        .await
        .expect("profile");
    assert_eq!(entity.key(), EntityKey::new(EntityKind::UserProfile, 2));
}

#[tokio::test]
async fn undecodable_cached_value_is_replaced() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);
    harness
        .cache
        .set("message:10", "{\"id\": \"garbage\"")
        .await
        .expect("cache set");

    let message = harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");
    assert_eq!(Some(message.clone()), harness.store.message(10));

    harness.core.wait_idle().await;
    let raw = harness
        .cache
        .get("message:10")
        .await
        .expect("cache get")
        .expect("repaired value");
    let repaired: MessageRecord = serde_json::from_str(&raw).expect("decodes");
    assert_eq!(repaired, message);
}

#[tokio::test]
async fn undecodable_value_in_a_batch_is_replaced() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);
    harness
        .cache
        .set("message:11", "not json")
        .await
        .expect("cache set");

    let messages = harness
        .core
        .resolver()
        .resolve_many::<MessageRecord>(&[10, 11])
        .await
        .expect("resolve");
    assert_eq!(messages.len(), 2);
    harness.core.wait_idle().await;

    for id in [10, 11] {
        let raw = harness
            .cache
            .get(&format!("message:{id}"))
            .await
            .expect("cache get")
            .expect("cached value");
        let cached: MessageRecord = serde_json::from_str(&raw).expect("decodes");
        assert_eq!(Some(cached), harness.store.message(id));
    }
}

#[tokio::test]
async fn batch_resolve_keeps_order_and_omits_missing() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);

    let messages = harness
        .core
        .resolver()
        .resolve_many::<MessageRecord>(&[12, 999, 10, 11])
        .await
        .expect("resolve many");
    let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
    assert_eq!(ids, vec![12, 10, 11]);
}

#[tokio::test]
async fn batch_resolve_serves_cached_members_during_outage() {
    let harness = Harness::new(10);
    seed_conversation(&harness.store);
    harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");
    harness.core.wait_idle().await;
    harness.store.set_unavailable(true);

    let messages = harness
        .core
        .resolver()
        .resolve_many::<MessageRecord>(&[10, 11])
        .await
        .expect("partial result");
    let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
    assert_eq!(ids, vec![10]);

    let err = harness
        .core
        .resolver()
        .resolve_many::<MessageRecord>(&[11])
        .await
        .expect_err("nothing cached");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unknown_participants_get_placeholders() {
    let harness = Harness::new(10);
    harness.store.add_user(1, "Ada");
    harness.store.add_conversation(2, &[1, 77]);
    harness.store.seed_message(2, 80, 1, BASE_MS + 5_000);

    let profiles: Vec<UserProfileRecord> = harness
        .core
        .resolver()
        .participants(2)
        .await
        .expect("participants");
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].display_name, "Ada");
    assert_eq!(profiles[1], UserProfileRecord::placeholder(77));
}
