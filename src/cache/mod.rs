//! Chorus cache backends and background work.
//!
//! - **Backends**: [`MemoryCache`] (in-process) and [`RedisCache`], both behind
//!   the [`CacheBackend`] trait and usually wrapped in a [`GuardedCache`].
//! - **Background work**: [`TaskQueue`] and [`WorkerPool`] apply populate,
//!   rebuild and fan-out tasks off the request path.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! op_timeout_ms = 50
//! message_horizon = 500
//! post_horizon = 200
//! comment_horizon = 200
//! conversation_horizon = 100
//! ```

mod backend;
mod config;
mod events;
mod guard;
pub mod keys;
mod lock;
mod memory;
mod queue;
mod redis_cache;
mod worker;

pub use backend::{AppendOutcome, CacheBackend, CacheError, ScoreBound};
pub use config::{CacheBackendKind, CacheConfig, IndexHorizons};
pub use events::{CacheTask, Epoch, RealtimeEvent, TaskKind};
pub use guard::{GuardedCache, cache_fallback};
pub use memory::MemoryCache;
pub use queue::{QueueConfig, TaskQueue, TaskReceivers};
pub use redis_cache::RedisCache;
pub use worker::{TaskHandler, WorkerPool};
