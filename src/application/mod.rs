//! The cache core: read-through resolution, ordered indices, write
//! propagation and pagination over a cache backend and a durable store.

pub mod coordinator;
pub mod core;
pub mod error;
pub mod index;
pub mod pagination;
pub mod propagator;
pub mod repos;
pub mod resolver;
pub mod seen;

pub use self::core::CacheCore;
