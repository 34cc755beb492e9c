//! Cache configuration.
//!
//! Built from the `[cache]` settings section. Index horizons have no defaults:
//! every deployment must choose how many recent members each kind of index keeps.

use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::types::ContainerKind;

const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_OP_TIMEOUT_MS: u64 = 50;
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 10_000;
const DEFAULT_MEMORY_INDEX_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

/// Maximum number of most-recent members a rebuild writes per container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHorizons {
    pub message: NonZeroU32,
    pub post: NonZeroU32,
    pub comment: NonZeroU32,
    pub conversation: NonZeroU32,
}

impl IndexHorizons {
    pub fn for_kind(&self, kind: ContainerKind) -> u64 {
        let horizon = match kind {
            ContainerKind::ConversationMessages => self.message,
            ContainerKind::NetworkPosts => self.post,
            ContainerKind::PostComments => self.comment,
            ContainerKind::UserConversations => self.conversation,
        };
        u64::from(horizon.get())
    }

    /// Same horizon for every container kind.
    pub fn uniform(horizon: NonZeroU32) -> Self {
        Self {
            message: horizon,
            post: horizon,
            comment: horizon,
            conversation: horizon,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Required when `backend` is `redis`.
    pub redis_url: Option<String>,
    /// Maximum in-flight backend operations.
    pub pool_size: usize,
    /// Per-operation timeout after which the cache counts as unavailable.
    pub op_timeout_ms: u64,
    /// Maximum scalar records held by the in-process backend.
    pub memory_entry_limit: usize,
    /// Maximum ordered indices held by the in-process backend.
    pub memory_index_limit: usize,
    pub horizons: IndexHorizons,
}

impl CacheConfig {
    /// In-process configuration with default limits.
    pub fn memory(horizons: IndexHorizons) -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: None,
            pool_size: DEFAULT_POOL_SIZE,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            memory_index_limit: DEFAULT_MEMORY_INDEX_LIMIT,
            horizons,
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms.max(1))
    }

    /// Returns the pool size, clamping to 1 if zero.
    pub fn pool_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.pool_size).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the scalar limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the index limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_index_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_index_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            pool_size: settings.pool_size.get() as usize,
            op_timeout_ms: u64::from(settings.op_timeout_ms.get()),
            memory_entry_limit: settings.memory_entry_limit.get() as usize,
            memory_index_limit: settings.memory_index_limit.get() as usize,
            horizons: settings.horizons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizons() -> IndexHorizons {
        IndexHorizons {
            message: NonZeroU32::new(200).expect("non-zero"),
            post: NonZeroU32::new(100).expect("non-zero"),
            comment: NonZeroU32::new(50).expect("non-zero"),
            conversation: NonZeroU32::new(25).expect("non-zero"),
        }
    }

    #[test]
    fn horizon_is_selected_per_container_kind() {
        let horizons = horizons();
        assert_eq!(horizons.for_kind(ContainerKind::ConversationMessages), 200);
        assert_eq!(horizons.for_kind(ContainerKind::NetworkPosts), 100);
        assert_eq!(horizons.for_kind(ContainerKind::PostComments), 50);
        assert_eq!(horizons.for_kind(ContainerKind::UserConversations), 25);
    }

    #[test]
    fn memory_defaults() {
        let config = CacheConfig::memory(horizons());
        assert_eq!(config.backend, CacheBackendKind::Memory);
        assert_eq!(config.op_timeout(), Duration::from_millis(50));
        assert_eq!(config.memory_entry_limit, 10_000);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn zero_limits_clamp_to_one() {
        let mut config = CacheConfig::memory(horizons());
        config.memory_index_limit = 0;
        config.pool_size = 0;
        assert_eq!(config.memory_index_limit_non_zero().get(), 1);
        assert_eq!(config.pool_size_non_zero().get(), 1);
    }
}
