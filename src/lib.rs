//! Read-through, write-through cache core for conversations, messages, posts
//! and comments.
//!
//! The durable store is the source of truth; the cache only accelerates reads.
//! See [`application::CacheCore`] for the assembled entry point.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
