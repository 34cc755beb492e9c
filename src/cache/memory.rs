//! In-process cache backend.
//!
//! Scalars and ordered indices live in separate LRU maps. The cardinality key
//! of an index is an ordinary scalar, so evicting either half is detected by
//! readers as a missing or inconsistent index and repaired by a rebuild.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::broadcast;

use crate::domain::types::IndexEntry;

use super::backend::{AppendOutcome, CacheBackend, CacheError, ScoreBound};
use super::config::CacheConfig;
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::memory";
const CHANNEL_CAPACITY: usize = 256;

/// Sorted set ordered newest-first, with a member lookup for re-scoring.
#[derive(Debug, Default, Clone)]
struct SortedIndex {
    entries: BTreeSet<IndexEntry>,
    scores: HashMap<i64, i64>,
}

impl SortedIndex {
    fn from_entries(entries: &[IndexEntry]) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.upsert(*entry);
        }
        index
    }

    /// Returns true when the member was not present before.
    fn upsert(&mut self, entry: IndexEntry) -> bool {
        match self.scores.insert(entry.member, entry.score) {
            Some(previous) => {
                self.entries.remove(&IndexEntry::new(entry.member, previous));
                self.entries.insert(entry);
                false
            }
            None => {
                self.entries.insert(entry);
                true
            }
        }
    }

    fn trim(&mut self, horizon: usize) {
        while self.entries.len() > horizon {
            if let Some(oldest) = self.entries.pop_last() {
                self.scores.remove(&oldest.member);
            }
        }
    }
}

pub struct MemoryCache {
    scalars: RwLock<LruCache<String, String>>,
    indices: RwLock<LruCache<String, SortedIndex>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            scalars: RwLock::new(LruCache::new(config.memory_entry_limit_non_zero())),
            indices: RwLock::new(LruCache::new(config.memory_index_limit_non_zero())),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Receive every payload published to `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = mutex_lock(&self.channels, SOURCE, "subscribe");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop an index's members while keeping its cardinality key.
    pub fn evict_index(&self, index: &str) {
        rw_write(&self.indices, SOURCE, "evict_index").pop(index);
    }

    /// Drop a scalar key.
    pub fn evict(&self, key: &str) {
        rw_write(&self.scalars, SOURCE, "evict").pop(key);
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(rw_write(&self.scalars, SOURCE, "get").get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "get_many");
        Ok(keys.iter().map(|key| scalars.get(key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        rw_write(&self.scalars, SOURCE, "set").put(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "set_many");
        for (key, value) in entries {
            scalars.put(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn set_many_if_absent(&self, entries: &[(String, String)]) -> Result<u64, CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "set_many_if_absent");
        let mut written = 0;
        for (key, value) in entries {
            if !scalars.contains(key) {
                scalars.put(key.clone(), value.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn replace_if_equals(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "replace_if_equals");
        if scalars.peek(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        scalars.put(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn set_max(&self, key: &str, value: i64) -> Result<i64, CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "set_max");
        let current = scalars
            .peek(key)
            .and_then(|raw| raw.parse::<i64>().ok());
        let stored = current.map_or(value, |current| current.max(value));
        scalars.put(key.to_string(), stored.to_string());
        Ok(stored)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(rw_read(&self.scalars, SOURCE, "exists").contains(key))
    }

    async fn index_len(&self, index: &str) -> Result<u64, CacheError> {
        let indices = rw_read(&self.indices, SOURCE, "index_len");
        Ok(indices
            .peek(index)
            .map_or(0, |sorted| sorted.entries.len() as u64))
    }

    async fn rev_range(
        &self,
        index: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        let mut indices = rw_write(&self.indices, SOURCE, "rev_range");
        let Some(sorted) = indices.get(index) else {
            return Ok(Vec::new());
        };
        Ok(sorted
            .entries
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .copied()
            .collect())
    }

    async fn rev_range_by_score(
        &self,
        index: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        let mut indices = rw_write(&self.indices, SOURCE, "rev_range_by_score");
        let Some(sorted) = indices.get(index) else {
            return Ok(Vec::new());
        };
        Ok(sorted
            .entries
            .iter()
            .skip_while(|entry| !max.admits_below(entry.score))
            .take_while(|entry| min.admits_above(entry.score))
            .skip(offset as usize)
            .take(count as usize)
            .copied()
            .collect())
    }

    async fn append_if_exists(
        &self,
        index: &str,
        count_key: &str,
        entry: IndexEntry,
        horizon: u64,
    ) -> Result<AppendOutcome, CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "append_if_exists");
        let Some(cardinality) = scalars.peek(count_key).cloned() else {
            return Ok(AppendOutcome::Missing);
        };

        let mut indices = rw_write(&self.indices, SOURCE, "append_if_exists");
        let sorted = indices.get_or_insert_mut(index.to_string(), SortedIndex::default);
        let inserted = sorted.upsert(entry);
        sorted.trim(horizon as usize);

        if !inserted {
            return Ok(AppendOutcome::Rescored);
        }
        let cardinality = cardinality.parse::<u64>().unwrap_or(0) + 1;
        scalars.put(count_key.to_string(), cardinality.to_string());
        Ok(AppendOutcome::Inserted)
    }

    async fn replace_index(
        &self,
        index: &str,
        count_key: &str,
        entries: &[IndexEntry],
        cardinality: u64,
    ) -> Result<(), CacheError> {
        let mut scalars = rw_write(&self.scalars, SOURCE, "replace_index");
        let mut indices = rw_write(&self.indices, SOURCE, "replace_index");
        indices.put(index.to_string(), SortedIndex::from_entries(entries));
        scalars.put(count_key.to_string(), cardinality.to_string());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        let channels = mutex_lock(&self.channels, SOURCE, "publish");
        if let Some(sender) = channels.get(channel) {
            // No subscribers is not an error.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }
}
