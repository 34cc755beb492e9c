//! Ordered index manager.
//!
//! Each container owns one cached sorted set of `(member, score)` pairs plus a
//! cardinality key. The cardinality key doubles as the existence marker, so an
//! empty container can be cached and an uncached one is never mistaken for an
//! empty one. Windows that the cached prefix cannot answer completely are read
//! from the store.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashSet;
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::application::error::AppError;
use crate::application::pagination::{IndexCursor, PageMode};
use crate::application::repos::{DurableStore, RepoError, StoreBoundary};
use crate::cache::keys::{index_count_key, index_key};
use crate::cache::{
    AppendOutcome, CacheBackend, CacheError, IndexHorizons, ScoreBound, TaskKind, TaskQueue,
    cache_fallback,
};
use crate::domain::types::{Container, IndexEntry};
use crate::infra::error::InfraError;

/// Extra members fetched per score-range batch to step over equal-score ties.
const TIE_SLACK: u64 = 16;

const METRIC_STORE_FALLBACK: &str = "chorus_index_store_fallback_total";
const METRIC_REBUILD: &str = "chorus_index_rebuild_total";
const METRIC_REBUILD_MS: &str = "chorus_rebuild_ms";

pub struct OrderedIndex {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn DurableStore>,
    tasks: Arc<TaskQueue>,
    horizons: IndexHorizons,
    rebuilding: DashSet<Container>,
}

impl OrderedIndex {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
        tasks: Arc<TaskQueue>,
        horizons: IndexHorizons,
    ) -> Self {
        Self {
            cache,
            store,
            tasks,
            horizons,
            rebuilding: DashSet::new(),
        }
    }

    pub fn horizon(&self, container: Container) -> u64 {
        self.horizons.for_kind(container.kind)
    }

    /// Member IDs ranked `start..start + count`, newest first.
    pub async fn window(
        &self,
        container: Container,
        start: u64,
        count: u64,
    ) -> Result<Vec<i64>, AppError> {
        let entries = self
            .page_entries(container, PageMode::FromStart { offset: start }, count)
            .await?;
        Ok(members(&entries))
    }

    /// Up to `count` newest members strictly newer than `cursor`.
    pub async fn window_after(
        &self,
        container: Container,
        cursor: IndexCursor,
        count: u64,
    ) -> Result<Vec<i64>, AppError> {
        let entries = self
            .page_entries(container, PageMode::After(cursor), count)
            .await?;
        Ok(members(&entries))
    }

    /// Up to `count` members strictly older than `cursor`, newest first.
    pub async fn window_before(
        &self,
        container: Container,
        cursor: IndexCursor,
        count: u64,
    ) -> Result<Vec<i64>, AppError> {
        let entries = self
            .page_entries(container, PageMode::Before(cursor), count)
            .await?;
        Ok(members(&entries))
    }

    /// Entries of one page, cache first.
    ///
    /// An uncached container is answered by the store and scheduled for a
    /// rebuild. A cache error is answered by the store without a rebuild. A
    /// short cached page is trusted only when the index holds the whole
    /// container.
    #[instrument(skip(self), fields(container = %container))]
    pub async fn page_entries(
        &self,
        container: Container,
        mode: PageMode,
        count: u64,
    ) -> Result<Vec<IndexEntry>, AppError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let count_key = index_count_key(&container);
        match self.cache.exists(&count_key).await {
            Ok(true) => {}
            Ok(false) => {
                self.request_rebuild(container);
                return self.from_store(container, mode, count, "uncached").await;
            }
            Err(err) => {
                cache_fallback("exists", &err);
                return self.from_store(container, mode, count, "cache_error").await;
            }
        }

        let index = index_key(&container);
        let horizon = self.horizon(container);
        let cached = match mode {
            PageMode::FromStart { offset } if offset >= horizon => {
                return self
                    .from_store(container, mode, count, "beyond_horizon")
                    .await;
            }
            PageMode::FromStart { offset } => self
                .cache
                .rev_range(&index, offset, count)
                .await
                .map(|entries| {
                    let complete = entries.len() as u64 >= count;
                    (entries, complete)
                }),
            PageMode::Before(cursor) => self.cached_before(&index, cursor, count, horizon).await,
            PageMode::After(cursor) => self.cached_after(&index, cursor, count).await,
        };

        match cached {
            Ok((entries, true)) => Ok(entries),
            Ok((entries, false)) => {
                self.settle_short(container, mode, count, entries, horizon)
                    .await
            }
            Err(err) => {
                cache_fallback("range", &err);
                self.from_store(container, mode, count, "cache_error").await
            }
        }
    }

    /// Add `entry` to a cached index. Uncached indices are left alone.
    pub async fn append(
        &self,
        container: Container,
        entry: IndexEntry,
    ) -> Result<AppendOutcome, CacheError> {
        let outcome = self
            .cache
            .append_if_exists(
                &index_key(&container),
                &index_count_key(&container),
                entry,
                self.horizon(container),
            )
            .await?;
        debug!(container = %container, member = entry.member, ?outcome, "Index append applied");
        Ok(outcome)
    }

    /// Schedule a rebuild unless one is already in flight for `container`.
    pub fn request_rebuild(&self, container: Container) -> bool {
        if !self.rebuilding.insert(container) {
            return false;
        }
        if self.tasks.submit(TaskKind::Rebuild(container)) {
            true
        } else {
            self.rebuilding.remove(&container);
            false
        }
    }

    /// Repopulate the index with the newest `horizon` members from the store.
    ///
    /// The index and its cardinality are replaced in one atomic write, so a
    /// concurrent reader sees the old index, no index, or the new one.
    #[instrument(skip(self), fields(container = %container))]
    pub async fn rebuild(&self, container: Container) -> Result<usize, AppError> {
        let started = Instant::now();
        let entity = container.kind.member_kind().as_str();
        let horizon = self.horizon(container);

        let read = async {
            let cardinality = self.store.count_index(container).await?;
            let entries = self
                .store
                .page_index(container, StoreBoundary::Offset(0), horizon)
                .await?;
            Ok::<_, RepoError>((cardinality, entries))
        };
        let (cardinality, entries) = match read.await {
            Ok(read) => read,
            Err(err) => {
                counter!(METRIC_REBUILD, "outcome" => "store_error").increment(1);
                return Err(AppError::from_repo(entity, err));
            }
        };
        let cardinality = cardinality.max(entries.len() as u64);

        if let Err(err) = self
            .cache
            .replace_index(
                &index_key(&container),
                &index_count_key(&container),
                &entries,
                cardinality,
            )
            .await
        {
            counter!(METRIC_REBUILD, "outcome" => "cache_error").increment(1);
            return Err(InfraError::from(err).into());
        }

        counter!(METRIC_REBUILD, "outcome" => "ok").increment(1);
        histogram!(METRIC_REBUILD_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            container = %container,
            members = entries.len(),
            cardinality,
            "Ordered index rebuilt"
        );
        Ok(entries.len())
    }

    /// Rebuild requested through [`Self::request_rebuild`]; clears the in-flight mark.
    pub async fn run_scheduled_rebuild(&self, container: Container) {
        let result = self.rebuild(container).await;
        self.rebuilding.remove(&container);
        if let Err(err) = result {
            warn!(container = %container, error = %err, "Scheduled index rebuild failed");
        }
    }

    pub fn rebuild_pending(&self, container: Container) -> bool {
        self.rebuilding.contains(&container)
    }

    async fn cached_before(
        &self,
        index: &str,
        cursor: IndexCursor,
        count: u64,
        horizon: u64,
    ) -> Result<(Vec<IndexEntry>, bool), CacheError> {
        let batch = count.saturating_add(TIE_SLACK);
        let mut offset: u64 = 0;
        // The cache never holds more than the horizon.
        let mut page = Vec::with_capacity(count.min(horizon) as usize);
        loop {
            let fetched = self
                .cache
                .rev_range_by_score(
                    index,
                    ScoreBound::Inclusive(cursor.score()),
                    ScoreBound::NegInf,
                    offset,
                    batch,
                )
                .await?;
            let exhausted = (fetched.len() as u64) < batch;
            page.extend(fetched.into_iter().filter(|entry| cursor.is_before(entry)));
            if page.len() as u64 >= count || exhausted {
                break;
            }
            offset = offset.saturating_add(batch);
        }
        page.truncate(count as usize);
        let complete = page.len() as u64 >= count;
        Ok((page, complete))
    }

    async fn cached_after(
        &self,
        index: &str,
        cursor: IndexCursor,
        count: u64,
    ) -> Result<(Vec<IndexEntry>, bool), CacheError> {
        let fetched = self.cache.rev_range(index, 0, count.saturating_add(1)).await?;
        // An entry at or below the cursor proves every newer member is cached.
        let reached_floor = fetched.iter().any(|entry| !cursor.is_after(entry));
        let mut page: Vec<IndexEntry> = fetched
            .into_iter()
            .take_while(|entry| cursor.is_after(entry))
            .collect();
        page.truncate(count as usize);
        let complete = reached_floor || page.len() as u64 >= count;
        Ok((page, complete))
    }

    async fn settle_short(
        &self,
        container: Container,
        mode: PageMode,
        count: u64,
        entries: Vec<IndexEntry>,
        horizon: u64,
    ) -> Result<Vec<IndexEntry>, AppError> {
        let index = index_key(&container);
        let count_key = index_count_key(&container);

        let len = match self.cache.index_len(&index).await {
            Ok(len) => len,
            Err(err) => {
                cache_fallback("index_len", &err);
                return self.from_store(container, mode, count, "cache_error").await;
            }
        };
        let cardinality = match self.cache.get(&count_key).await {
            Ok(Some(raw)) => match raw.parse::<u64>() {
                Ok(cardinality) => cardinality,
                Err(err) => {
                    cache_fallback("cardinality", &CacheError::codec(err));
                    self.request_rebuild(container);
                    return self.from_store(container, mode, count, "cache_error").await;
                }
            },
            Ok(None) => {
                self.request_rebuild(container);
                return self.from_store(container, mode, count, "uncached").await;
            }
            Err(err) => {
                cache_fallback("get", &err);
                return self.from_store(container, mode, count, "cache_error").await;
            }
        };

        if cardinality <= len {
            return Ok(entries);
        }
        if len >= horizon {
            return self
                .from_store(container, mode, count, "beyond_horizon")
                .await;
        }

        warn!(
            container = %container,
            cached = len,
            cardinality,
            horizon,
            "Cached index holds fewer members than the container; rebuilding"
        );
        counter!("chorus_index_inconsistent_total").increment(1);
        self.request_rebuild(container);
        self.from_store(container, mode, count, "inconsistent").await
    }

    async fn from_store(
        &self,
        container: Container,
        mode: PageMode,
        count: u64,
        reason: &'static str,
    ) -> Result<Vec<IndexEntry>, AppError> {
        counter!(METRIC_STORE_FALLBACK, "reason" => reason).increment(1);
        let boundary = match mode {
            PageMode::FromStart { offset } => StoreBoundary::Offset(offset),
            PageMode::After(cursor) => StoreBoundary::After(cursor),
            PageMode::Before(cursor) => StoreBoundary::Before(cursor),
        };
        self.store
            .page_index(container, boundary, count)
            .await
            .map_err(|err| AppError::from_repo(container.kind.member_kind().as_str(), err))
    }
}

fn members(entries: &[IndexEntry]) -> Vec<i64> {
    entries.iter().map(|entry| entry.member).collect()
}
