mod common;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use chorus::application::propagator::Mutation;
use chorus::application::repos::NewMessageParams;
use chorus::cache::keys::index_key;
use chorus::cache::{CacheBackend, QueueConfig, TaskKind, TaskQueue};
use chorus::domain::entities::MessageRecord;
use chorus::domain::types::Container;
use metrics_util::debugging::{DebuggingRecorder, Snapshotter};
use serial_test::serial;

use common::{FailingCache, FakeStore, Harness, core_with, seed_conversation};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn metric_names() -> HashSet<String> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect()
}

fn assert_emitted(expected: &[&str]) {
    let names = metric_names();
    for metric in expected {
        assert!(names.contains(*metric), "missing metric: {metric}");
    }
}

#[tokio::test]
#[serial]
async fn read_paths_emit_expected_metric_keys() {
    snapshotter();
    let harness = Harness::new(10);
    seed_conversation(&harness.store);
    let container = Container::conversation_messages(1);

    // Miss, then hit once the populate task has run.
    harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");
    harness.core.wait_idle().await;
    harness
        .core
        .resolve::<MessageRecord>(10)
        .await
        .expect("resolve");

    // Undecodable value falls back to the store.
    harness
        .cache
        .set("message:11", "not json")
        .await
        .expect("cache set");
    harness
        .core
        .resolve::<MessageRecord>(11)
        .await
        .expect("resolve");

    // Uncached index, scheduled rebuild, then a lost member set.
    harness
        .core
        .index()
        .window(container, 0, 3)
        .await
        .expect("window");
    harness.core.wait_idle().await;
    harness.cache.evict_index(&index_key(&container));
    harness
        .core
        .index()
        .window(container, 0, 3)
        .await
        .expect("window");
    harness.core.wait_idle().await;

    assert_emitted(&[
        "chorus_cache_hit_total",
        "chorus_cache_miss_total",
        "chorus_cache_fallback_total",
        "chorus_index_store_fallback_total",
        "chorus_index_inconsistent_total",
        "chorus_index_rebuild_total",
        "chorus_rebuild_ms",
        "chorus_task_queue_len",
        "chorus_task_ms",
    ]);
}

#[tokio::test]
#[serial]
async fn write_paths_emit_expected_metric_keys() {
    snapshotter();
    let store = FakeStore::new();
    seed_conversation(&store);
    let core = core_with(Arc::new(FailingCache), store, 10);

    core.commit(Mutation::NewMessage(NewMessageParams {
        conversation_id: 1,
        sender_id: 1,
        body: "hello".to_string(),
    }))
    .await
    .expect("commit");
    core.wait_idle().await;

    let (queue, _receivers) = TaskQueue::new(QueueConfig {
        workers: 1,
        capacity: 1,
    });
    assert!(queue.submit(TaskKind::Rebuild(Container::network_posts(1))));
    assert!(!queue.submit(TaskKind::Rebuild(Container::network_posts(2))));

    assert_emitted(&["chorus_fanout_failure_total", "chorus_task_dropped_total"]);
}
