//! Redis-backed set store.
//!
//! Wire-protocol store for deployments where many processes validate
//! against the same sets. Uses `ConnectionManager` for automatic
//! reconnection and maps each membership set onto a native Redis set:
//! `SADD` to add and re-arm, `SISMEMBER` to probe, `EXPIRE` for the TTL.
//!
//! # Empty Sets
//!
//! Redis cannot represent an empty set: a key with no members does not
//! exist. A back-fill of an empty relation is therefore a no-op here, and
//! the relation is back-filled again on the next probe. Embedded stores
//! do not share this limitation.
//!
//! # Expiry Granularity
//!
//! `EXPIRE` has whole-second resolution. Sub-second TTLs round up to one
//! second so the set always outlives the call that armed it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use refset_core::{FieldValue, StoreError};

use crate::set_key::SetKey;
use crate::traits::{SetStore, SetStoreStats};

/// Error type for Redis store operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// Failed to connect to the Redis server.
    #[error("Failed to connect to Redis: {0}")]
    Connect(String),

    /// A command failed.
    #[error("Redis command failed: {0}")]
    Command(String),

    /// The server reply had an unexpected shape.
    #[error("Unexpected Redis reply: {0}")]
    Response(String),
}

impl From<RedisStoreError> for StoreError {
    fn from(e: RedisStoreError) -> Self {
        let reason = e.to_string();
        match e {
            RedisStoreError::Connect(_) => StoreError::Unavailable { reason },
            RedisStoreError::Command(_) => StoreError::Backend { reason },
            RedisStoreError::Response(_) => StoreError::Decode { reason },
        }
    }
}

fn command_error(e: redis::RedisError) -> RedisStoreError {
    if e.kind() == redis::ErrorKind::TypeError {
        RedisStoreError::Response(e.to_string())
    } else {
        RedisStoreError::Command(e.to_string())
    }
}

// EXPIRE deletes the key on a non-positive timeout, so sub-second TTLs
// round up and TTLs past the i64 range clamp instead of wrapping.
fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[derive(Default)]
struct ProbeCounters {
    hits: u64,
    misses: u64,
}

/// Redis-backed [`SetStore`].
pub struct RedisSetStore {
    manager: ConnectionManager,
    counters: std::sync::RwLock<ProbeCounters>,
}

impl RedisSetStore {
    /// Connect to the Redis server at `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: impl AsRef<str>) -> Result<Self, RedisStoreError> {
        let client = redis::Client::open(url.as_ref())
            .map_err(|e| RedisStoreError::Connect(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| RedisStoreError::Connect(e.to_string()))?;

        Ok(Self {
            manager,
            counters: std::sync::RwLock::new(ProbeCounters::default()),
        })
    }

    fn record_hit(&self) {
        if let Ok(mut counters) = self.counters.write() {
            counters.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut counters) = self.counters.write() {
            counters.misses += 1;
        }
    }
}

#[async_trait]
impl SetStore for RedisSetStore {
    async fn exists(&self, key: &SetKey) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn
            .exists(key.name())
            .await
            .map_err(command_error)?;
        Ok(exists)
    }

    async fn contains(&self, key: &SetKey, member: &FieldValue) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let present: bool = conn
            .sismember(key.name(), member.as_str())
            .await
            .map_err(command_error)?;

        if present {
            self.record_hit();
        } else {
            self.record_miss();
        }
        Ok(present)
    }

    async fn add(&self, key: &SetKey, member: &FieldValue, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .sadd(key.name(), member.as_str())
            .ignore()
            .expire(key.name(), ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn add_all(
        &self,
        key: &SetKey,
        members: &[FieldValue],
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        // SADD rejects an empty member list, and a memberless key cannot
        // exist anyway. See the module docs on empty sets.
        if members.is_empty() {
            return Ok(0);
        }

        let member_args: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        let mut conn = self.manager.clone();
        let (added,): (u64,) = redis::pipe()
            .atomic()
            .sadd(key.name(), member_args)
            .expire(key.name(), ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(added)
    }

    /// Probe counters only. Redis cannot report set and member counts
    /// without scanning the whole keyspace, so both are zero here.
    async fn stats(&self) -> Result<SetStoreStats, StoreError> {
        let (hits, misses) = self
            .counters
            .read()
            .map(|c| (c.hits, c.misses))
            .unwrap_or((0, 0));
        Ok(SetStoreStats {
            hits,
            misses,
            set_count: 0,
            member_count: 0,
        })
    }
}

#[cfg(test)]
mod ttl_tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_rounds_up_and_clamps() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(90)), 90);
        // A wrap here would hand EXPIRE a negative timeout, which
        // deletes the key outright.
        assert_eq!(ttl_seconds(Duration::from_secs(u64::MAX)), i64::MAX);
    }
}
