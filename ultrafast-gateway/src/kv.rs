//! # Shared key/value client
//!
//! Thin abstraction over the counters, sorted sets, and TTLs that the quota
//! manager, rate limiter, and multi-layer cache need from a shared store.
//! Backed by Redis when configured, or an in-process `DashMap` otherwise so
//! the gateway runs standalone without an external dependency.
//!
//! Key layout (must match across backends):
//! - `quota:{account}`
//! - `slidingwindow:{provider}:{account}:{kind}`
//! - `tokenbucket:{provider}:{account}:{kind}` (+ sibling `:last_refill`)
//! - `ratelimit:concurrent:{provider}:{account}`
//! - `resp:{fingerprint}`
//! - `sem:{embedding-hash}`

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("backend error: {0}")]
    Backend(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Current time in nanoseconds since the epoch, used as the sorted-set score
/// for sliding-window entries.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[async_trait]
pub trait KvClient: Send + Sync {
    /// GET a string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;
    /// SET a string value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;
    /// DEL a key.
    async fn del(&self, key: &str) -> KvResult<()>;
    /// Atomically increment a counter by `by`, creating it at `by` if absent.
    /// Sets (or refreshes) the TTL only the first time the key is created.
    async fn incr_by(&self, key: &str, by: i64, ttl: Duration) -> KvResult<i64>;
    /// Atomically decrement a counter by `by`, floor-less (can go negative;
    /// callers roll back on a negative result when that's invalid for them).
    async fn decr_by(&self, key: &str, by: i64) -> KvResult<i64>;
    /// Refresh (or set) a key's TTL without altering its value.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()>;

    /// Sorted set: add a member with a score (nanosecond timestamp).
    async fn zadd(&self, key: &str, member: &str, score: i64) -> KvResult<()>;
    /// Sorted set: remove members with score < `below`.
    async fn zremrangebyscore(&self, key: &str, below: i64) -> KvResult<()>;
    /// Sorted set: current cardinality.
    async fn zcard(&self, key: &str) -> KvResult<i64>;
}

/// In-process implementation for standalone deployments or tests.
#[derive(Default)]
pub struct InMemoryKv {
    strings: DashMap<String, String>,
    counters: DashMap<String, i64>,
    sorted_sets: DashMap<String, Vec<(String, i64)>>,
}

impl InMemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> KvResult<()> {
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.strings.remove(key);
        self.counters.remove(key);
        self.sorted_sets.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, by: i64, _ttl: Duration) -> KvResult<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += by;
        Ok(*entry)
    }

    async fn decr_by(&self, key: &str, by: i64) -> KvResult<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry -= by;
        Ok(*entry)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> KvResult<()> {
        // In-memory entries never expire proactively; callers treat the
        // in-memory backend as best-effort and rely on the durable store.
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> KvResult<()> {
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, below: i64) -> KvResult<()> {
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            set.retain(|(_, score)| *score >= below);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> KvResult<i64> {
        Ok(self
            .sorted_sets
            .get(key)
            .map(|set| set.len() as i64)
            .unwrap_or(0))
    }
}

/// Redis-backed implementation for multi-instance deployments.
pub struct RedisKv {
    client: redis::Client,
}

impl RedisKv {
    pub fn new(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> KvResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

#[async_trait]
impl KvClient for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(d) if d.as_secs() > 0 => redis::cmd("SETEX")
                .arg(key)
                .arg(d.as_secs())
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Backend(e.to_string())),
            _ => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Backend(e.to_string())),
        }
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, by: i64, ttl: Duration) -> KvResult<i64> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        if count == by {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Backend(e.to_string()))?;
        }
        Ok(count)
    }

    async fn decr_by(&self, key: &str, by: i64) -> KvResult<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("DECRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, below: i64) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({below}"))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_incr_sets_ttl_only_on_creation() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.incr_by("k", 1, Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(kv.incr_by("k", 1, Duration::from_secs(60)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sliding_window_expires_old_members() {
        let kv = InMemoryKv::new();
        kv.zadd("w", "a", 100).await.unwrap();
        kv.zadd("w", "b", 200).await.unwrap();
        assert_eq!(kv.zcard("w").await.unwrap(), 2);
        kv.zremrangebyscore("w", 150).await.unwrap();
        assert_eq!(kv.zcard("w").await.unwrap(), 1);
    }
}
