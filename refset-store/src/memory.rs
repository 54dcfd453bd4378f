//! In-memory set store.
//!
//! Process-local store for tests and single-process deployments. Expired
//! sets are purged lazily on access, so a probe after the TTL behaves
//! exactly like a probe against a store that evicted eagerly.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refset_core::{FieldValue, StoreError};
use tokio::sync::RwLock;

use crate::set_key::SetKey;
use crate::traits::{SetStore, SetStoreStats};

struct SetEntry {
    members: HashSet<FieldValue>,
    expires_at: DateTime<Utc>,
}

impl SetEntry {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Default)]
struct ProbeCounters {
    hits: u64,
    misses: u64,
}

/// In-memory [`SetStore`] keyed by set name.
pub struct MemorySetStore {
    sets: RwLock<HashMap<String, SetEntry>>,
    counters: std::sync::RwLock<ProbeCounters>,
}

impl MemorySetStore {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(HashMap::new()),
            counters: std::sync::RwLock::new(ProbeCounters::default()),
        }
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

impl Default for MemorySetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SetStore for MemorySetStore {
    async fn exists(&self, key: &SetKey) -> Result<bool, StoreError> {
        let mut sets = self.sets.write().await;
        match sets.get(key.name()) {
            Some(entry) if entry.is_expired() => {
                sets.remove(key.name());
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn contains(&self, key: &SetKey, member: &FieldValue) -> Result<bool, StoreError> {
        let mut sets = self.sets.write().await;
        let present = match sets.get(key.name()) {
            Some(entry) if entry.is_expired() => {
                sets.remove(key.name());
                false
            }
            Some(entry) => entry.members.contains(member),
            None => false,
        };
        drop(sets);

        if present {
            self.record_hit();
        } else {
            self.record_miss();
        }
        Ok(present)
    }

    async fn add(&self, key: &SetKey, member: &FieldValue, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = crate::expiry_from_now(ttl);
        let mut sets = self.sets.write().await;
        let entry = sets
            .entry(key.name().to_string())
            .or_insert_with(|| SetEntry {
                members: HashSet::new(),
                expires_at,
            });

        // A dead set must not come back to life with its stale members.
        if entry.is_expired() {
            entry.members.clear();
        }
        entry.members.insert(member.clone());
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn add_all(
        &self,
        key: &SetKey,
        members: &[FieldValue],
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let expires_at = crate::expiry_from_now(ttl);
        let mut sets = self.sets.write().await;
        let entry = sets
            .entry(key.name().to_string())
            .or_insert_with(|| SetEntry {
                members: HashSet::new(),
                expires_at,
            });

        if entry.is_expired() {
            entry.members.clear();
        }
        let mut added = 0u64;
        for member in members {
            if entry.members.insert(member.clone()) {
                added += 1;
            }
        }
        entry.expires_at = expires_at;
        Ok(added)
    }

    async fn stats(&self) -> Result<SetStoreStats, StoreError> {
        let mut sets = self.sets.write().await;
        sets.retain(|_, entry| !entry.is_expired());
        let set_count = sets.len() as u64;
        let member_count = sets.values().map(|e| e.members.len() as u64).sum();
        drop(sets);

        let (hits, misses) = self
            .counters
            .read()
            .map(|c| (c.hits, c.misses))
            .unwrap_or((0, 0));
        Ok(SetStoreStats {
            hits,
            misses,
            set_count,
            member_count,
        })
    }
}
