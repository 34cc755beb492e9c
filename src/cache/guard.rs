//! Per-operation timeout and the cache fallback policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use crate::domain::types::IndexEntry;

use super::backend::{AppendOutcome, CacheBackend, CacheError, ScoreBound};

/// Decide whether a failed cache operation may be answered by the store.
///
/// Every cache failure is a miss: the cache never distinguishes "empty" from
/// "down". The match is exhaustive so a new error kind forces a decision here.
pub fn cache_fallback(op: &'static str, err: &CacheError) -> bool {
    let reason = match err {
        CacheError::Unavailable(_) => "unavailable",
        CacheError::Timeout => "timeout",
        CacheError::Codec(_) => "codec",
    };
    debug!(op, reason, error = %err, "Cache operation failed; falling back to store");
    counter!("chorus_cache_fallback_total", "op" => op, "reason" => reason).increment(1);
    true
}

/// Wraps a backend so every call completes within `timeout`.
pub struct GuardedCache {
    inner: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl GuardedCache {
    pub fn new(inner: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T>(
        &self,
        fut: impl Future<Output = Result<T, CacheError>> + Send,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl CacheBackend for GuardedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.guard(self.inner.get(key)).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.guard(self.inner.get_many(keys)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.guard(self.inner.set(key, value)).await
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), CacheError> {
        self.guard(self.inner.set_many(entries)).await
    }

    async fn set_many_if_absent(&self, entries: &[(String, String)]) -> Result<u64, CacheError> {
        self.guard(self.inner.set_many_if_absent(entries)).await
    }

    async fn replace_if_equals(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        self.guard(self.inner.replace_if_equals(key, expected, value))
            .await
    }

    async fn set_max(&self, key: &str, value: i64) -> Result<i64, CacheError> {
        self.guard(self.inner.set_max(key, value)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.guard(self.inner.exists(key)).await
    }

    async fn index_len(&self, index: &str) -> Result<u64, CacheError> {
        self.guard(self.inner.index_len(index)).await
    }

    async fn rev_range(
        &self,
        index: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        self.guard(self.inner.rev_range(index, start, count)).await
    }

    async fn rev_range_by_score(
        &self,
        index: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        self.guard(self.inner.rev_range_by_score(index, max, min, offset, count))
            .await
    }

    async fn append_if_exists(
        &self,
        index: &str,
        count_key: &str,
        entry: IndexEntry,
        horizon: u64,
    ) -> Result<AppendOutcome, CacheError> {
        self.guard(self.inner.append_if_exists(index, count_key, entry, horizon))
            .await
    }

    async fn replace_index(
        &self,
        index: &str,
        count_key: &str,
        entries: &[IndexEntry],
        cardinality: u64,
    ) -> Result<(), CacheError> {
        self.guard(self.inner.replace_index(index, count_key, entries, cardinality))
            .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        self.guard(self.inner.publish(channel, payload)).await
    }
}
