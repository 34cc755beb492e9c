//! Cache backend abstraction.
//!
//! Scalar records are stored as JSON strings under `{kind}:{id}` keys. Ordered
//! indices are sorted sets of entity IDs scored by Unix milliseconds; each index
//! is paired with a cardinality key whose presence marks the index as cached.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::IndexEntry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out")]
    Timeout,
    #[error("cached value could not be decoded: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}

/// One end of a score range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Inclusive(i64),
    Exclusive(i64),
    PosInf,
    NegInf,
}

impl ScoreBound {
    /// Redis range argument form (`s`, `(s`, `+inf`, `-inf`).
    pub fn to_redis_arg(self) -> String {
        match self {
            ScoreBound::Inclusive(score) => score.to_string(),
            ScoreBound::Exclusive(score) => format!("({score}"),
            ScoreBound::PosInf => "+inf".to_string(),
            ScoreBound::NegInf => "-inf".to_string(),
        }
    }

    /// Whether `score` lies at or below this bound used as a maximum.
    pub fn admits_below(self, score: i64) -> bool {
        match self {
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
            ScoreBound::PosInf => true,
            ScoreBound::NegInf => false,
        }
    }

    /// Whether `score` lies at or above this bound used as a minimum.
    pub fn admits_above(self, score: i64) -> bool {
        match self {
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
            ScoreBound::PosInf => false,
            ScoreBound::NegInf => true,
        }
    }
}

/// Result of [`CacheBackend::append_if_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The index is not cached; nothing was written.
    Missing,
    /// A new member was added and the cardinality bumped.
    Inserted,
    /// The member was already present; only its score changed.
    Rescored,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Values in the same order as `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), CacheError>;

    /// Write only the keys that hold no value yet; returns how many were written.
    async fn set_many_if_absent(&self, entries: &[(String, String)]) -> Result<u64, CacheError>;

    /// Overwrite `key` only while it still holds `expected`.
    async fn replace_if_equals(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError>;

    /// Store `max(current, value)` and return the stored value.
    async fn set_max(&self, key: &str, value: i64) -> Result<i64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Number of members currently held by the sorted set `index`.
    async fn index_len(&self, index: &str) -> Result<u64, CacheError>;

    /// Members by descending rank, `start` counted from the newest.
    async fn rev_range(
        &self,
        index: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError>;

    /// Members with `min <= score <= max` (per bound kind), newest first.
    async fn rev_range_by_score(
        &self,
        index: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError>;

    /// Add or re-score `entry` only when the index is cached, then trim the
    /// index to its newest `horizon` members.
    async fn append_if_exists(
        &self,
        index: &str,
        count_key: &str,
        entry: IndexEntry,
        horizon: u64,
    ) -> Result<AppendOutcome, CacheError>;

    /// Atomically replace the index contents and its recorded cardinality.
    async fn replace_index(
        &self,
        index: &str,
        count_key: &str,
        entries: &[IndexEntry],
        cardinality: u64,
    ) -> Result<(), CacheError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError>;
}
