//! Redis cache backend.
//!
//! A multiplexed `ConnectionManager` is shared by all callers; a semaphore caps
//! the number of operations in flight, acquired and released per operation.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::info;

use crate::domain::types::IndexEntry;

use super::backend::{AppendOutcome, CacheBackend, CacheError, ScoreBound};
use super::keys::{decode_member, encode_member};

/// KEYS: index, cardinality. ARGV: score, member, horizon.
/// Returns -1 when the index is not cached, otherwise the ZADD result.
const APPEND_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 then
  return -1
end
local added = redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
if added == 1 then
  redis.call('INCR', KEYS[2])
end
local excess = redis.call('ZCARD', KEYS[1]) - tonumber(ARGV[3])
if excess > 0 then
  redis.call('ZREMRANGEBYRANK', KEYS[1], 0, excess - 1)
end
return added
"#;

/// KEYS: key. ARGV: value. Returns the stored maximum.
const SET_MAX_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]))
local value = tonumber(ARGV[1])
if current == nil or value > current then
  redis.call('SET', KEYS[1], ARGV[1])
  return value
end
return current
"#;

/// KEYS: key. ARGV: expected, value. Returns 1 when the value was replaced.
const REPLACE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

pub struct RedisCache {
    manager: ConnectionManager,
    permits: Arc<Semaphore>,
    append: Script,
    set_max: Script,
    replace: Script,
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::unavailable(err)
}

/// Redis range arguments are signed 64-bit integers.
fn range_arg(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn decode_entries(raw: Vec<(String, f64)>) -> Result<Vec<IndexEntry>, CacheError> {
    raw.into_iter()
        .map(|(member, score)| Ok(IndexEntry::new(decode_member(&member)?, score as i64)))
        .collect()
}

impl RedisCache {
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let manager = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!(pool_size, "Connected to redis cache");
        Ok(Self {
            manager,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            append: Script::new(APPEND_SCRIPT),
            set_max: Script::new(SET_MAX_SCRIPT),
            replace: Script::new(REPLACE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<(SemaphorePermit<'_>, ConnectionManager), CacheError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CacheError::Unavailable("redis pool closed".to_string()))?;
        Ok((permit, self.manager.clone()))
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let (_permit, mut conn) = self.connection().await?;
        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("MSET");
        for (key, value) in entries {
            cmd.arg(key).arg(value);
        }
        let (_permit, mut conn) = self.connection().await?;
        let _: () = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn set_many_if_absent(&self, entries: &[(String, String)]) -> Result<u64, CacheError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value).arg("NX");
        }
        let (_permit, mut conn) = self.connection().await?;
        let replies: Vec<Option<String>> =
            pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(replies.iter().filter(|reply| reply.is_some()).count() as u64)
    }

    async fn replace_if_equals(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let replaced: i64 = self
            .replace
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(replaced == 1)
    }

    async fn set_max(&self, key: &str, value: i64) -> Result<i64, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let stored: i64 = self
            .set_max
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(stored)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(found > 0)
    }

    async fn index_len(&self, index: &str) -> Result<u64, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let len: u64 = redis::cmd("ZCARD")
            .arg(index)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(len)
    }

    async fn rev_range(
        &self,
        index: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (_permit, mut conn) = self.connection().await?;
        let raw: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(index)
            .arg(range_arg(start))
            .arg(range_arg(start.saturating_add(count - 1)))
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        decode_entries(raw)
    }

    async fn rev_range_by_score(
        &self,
        index: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: u64,
        count: u64,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (_permit, mut conn) = self.connection().await?;
        let raw: Vec<(String, f64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(index)
            .arg(max.to_redis_arg())
            .arg(min.to_redis_arg())
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(range_arg(offset))
            .arg(range_arg(count))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        decode_entries(raw)
    }

    async fn append_if_exists(
        &self,
        index: &str,
        count_key: &str,
        entry: IndexEntry,
        horizon: u64,
    ) -> Result<AppendOutcome, CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let added: i64 = self
            .append
            .key(index)
            .key(count_key)
            .arg(entry.score)
            .arg(encode_member(entry.member))
            .arg(horizon)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(match added {
            -1 => AppendOutcome::Missing,
            0 => AppendOutcome::Rescored,
            _ => AppendOutcome::Inserted,
        })
    }

    async fn replace_index(
        &self,
        index: &str,
        count_key: &str,
        entries: &[IndexEntry],
        cardinality: u64,
    ) -> Result<(), CacheError> {
        let members: Vec<(i64, String)> = entries
            .iter()
            .map(|entry| (entry.score, encode_member(entry.member)))
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic().del(index).ignore();
        if !members.is_empty() {
            pipe.zadd_multiple(index, &members).ignore();
        }
        pipe.set(count_key, cardinality).ignore();

        let (_permit, mut conn) = self.connection().await?;
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        let (_permit, mut conn) = self.connection().await?;
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_args_saturate_at_signed_max() {
        assert_eq!(range_arg(0), 0);
        assert_eq!(range_arg(99), 99);
        assert_eq!(range_arg(u64::MAX), i64::MAX);
    }
}
