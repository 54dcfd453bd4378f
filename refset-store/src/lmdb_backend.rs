//! LMDB-backed set store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide an embedded,
//! memory-mapped membership store for single-host deployments.
//!
//! # Record Layout
//!
//! Each set occupies one key namespace (see [`SetKey`]):
//!
//! - The metadata record holds the set's expiry as 8 little-endian bytes of
//!   millisecond timestamp. A set is live iff this record exists and the
//!   expiry is in the future.
//! - One empty-valued record per member.
//!
//! Members carry no expiry of their own; the set lives and dies as a whole.
//! Expired records are not reclaimed eagerly: reads consult the metadata
//! record only, and the next write into a dead namespace purges it before
//! inserting, so a re-armed expiry can never revive stale members.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; every
//! write path is a single write transaction, so concurrent probes never
//! observe a half-replaced set.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use refset_core::{FieldValue, StoreError};

use crate::set_key::{DecodedKey, SetKey};
use crate::traits::{SetStore, SetStoreStats};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        let reason = e.to_string();
        match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) => {
                StoreError::Unavailable { reason }
            }
            LmdbStoreError::Transaction(_) | LmdbStoreError::Io(_) => {
                StoreError::Backend { reason }
            }
        }
    }
}

fn encode_expiry(expires_at: DateTime<Utc>) -> [u8; 8] {
    expires_at.timestamp_millis().to_le_bytes()
}

/// A garbled or truncated expiry reads as `None`, which callers treat as
/// expired; the set then heals itself through the next back-fill.
fn decode_expiry(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let millis = i64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?);
    DateTime::from_timestamp_millis(millis)
}

#[derive(Default)]
struct ProbeCounters {
    hits: u64,
    misses: u64,
}

/// LMDB-backed [`SetStore`].
///
/// # Example
///
/// ```ignore
/// use refset_store::{LmdbSetStore, SetKey};
///
/// let store = LmdbSetStore::new("/var/lib/refset", 100)?;
/// let key = SetKey::from_name("set_genre_id_for_genre");
/// store.add(&key, &FieldValue::from(42), Duration::from_secs(3600)).await?;
/// ```
pub struct LmdbSetStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    counters: std::sync::RwLock<ProbeCounters>,
}

impl LmdbSetStore {
    /// Create a new LMDB set store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
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

    /// Whether the set's metadata record exists with an unexpired deadline.
    fn set_is_live(&self, rtxn: &heed::RoTxn, key: &SetKey) -> Result<bool, LmdbStoreError> {
        match self.db.get(rtxn, &key.meta_key()) {
            Ok(Some(bytes)) => Ok(decode_expiry(bytes).map_or(false, |at| at > Utc::now())),
            Ok(None) => Ok(false),
            Err(e) => Err(LmdbStoreError::Transaction(e.to_string())),
        }
    }

    /// Purge the set's namespace if its expiry has lapsed.
    ///
    /// Runs inside the caller's write transaction, so a concurrent re-fill
    /// cannot slip members in between the purge and the inserts that
    /// follow. An absent metadata record means an absent set: every write
    /// touches the metadata record in the same transaction as its members,
    /// so members cannot be orphaned.
    fn purge_if_dead(&self, wtxn: &mut heed::RwTxn, key: &SetKey) -> Result<(), LmdbStoreError> {
        let dead = match self.db.get(wtxn, &key.meta_key()) {
            Ok(Some(bytes)) => decode_expiry(bytes).map_or(true, |at| at <= Utc::now()),
            Ok(None) => false,
            Err(e) => return Err(LmdbStoreError::Transaction(e.to_string())),
        };
        if !dead {
            return Ok(());
        }

        let prefix = key.prefix();
        let mut stale = Vec::new();
        {
            let iter = self
                .db
                .iter(wtxn)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            for result in iter {
                let (record_key, _) = match result {
                    Ok(kv) => kv,
                    Err(_) => continue,
                };
                if record_key.len() >= prefix.len() && record_key[..prefix.len()] == prefix[..] {
                    stale.push(record_key.to_vec());
                }
            }
        }

        for record_key in &stale {
            let _ = self.db.delete(wtxn, record_key);
        }
        Ok(())
    }
}

#[async_trait]
impl SetStore for LmdbSetStore {
    async fn exists(&self, key: &SetKey) -> Result<bool, StoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(self.set_is_live(&rtxn, key)?)
    }

    async fn contains(&self, key: &SetKey, member: &FieldValue) -> Result<bool, StoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let present = if self.set_is_live(&rtxn, key)? {
            match self.db.get(&rtxn, &key.member_key(member)) {
                Ok(found) => found.is_some(),
                Err(e) => return Err(LmdbStoreError::Transaction(e.to_string()).into()),
            }
        } else {
            false
        };
        drop(rtxn);

        if present {
            self.record_hit();
        } else {
            self.record_miss();
        }
        Ok(present)
    }

    async fn add(&self, key: &SetKey, member: &FieldValue, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = crate::expiry_from_now(ttl);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.purge_if_dead(&mut wtxn, key)?;

        self.db
            .put(&mut wtxn, &key.meta_key(), &encode_expiry(expires_at))
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, &key.member_key(member), &[])
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn add_all(
        &self,
        key: &SetKey,
        members: &[FieldValue],
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let expires_at = crate::expiry_from_now(ttl);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.purge_if_dead(&mut wtxn, key)?;

        self.db
            .put(&mut wtxn, &key.meta_key(), &encode_expiry(expires_at))
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut added = 0u64;
        for member in members {
            let member_key = key.member_key(member);
            let is_new = self.db.get(&wtxn, &member_key).ok().flatten().is_none();
            self.db
                .put(&mut wtxn, &member_key, &[])
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            if is_new {
                added += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(added)
    }

    async fn stats(&self) -> Result<SetStoreStats, StoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let now = Utc::now();
        let mut live_sets: HashSet<String> = HashSet::new();
        let mut member_tallies: HashMap<String, u64> = HashMap::new();

        for result in iter {
            let (record_key, value) = match result {
                Ok(kv) => kv,
                Err(_) => continue,
            };
            match SetKey::decode(record_key) {
                Some(DecodedKey::Meta { set }) => {
                    if decode_expiry(value).map_or(false, |at| at > now) {
                        live_sets.insert(set);
                    }
                }
                Some(DecodedKey::Member { set, .. }) => {
                    *member_tallies.entry(set).or_default() += 1;
                }
                None => {}
            }
        }
        drop(rtxn);

        let set_count = live_sets.len() as u64;
        let member_count = live_sets
            .iter()
            .filter_map(|set| member_tallies.get(set))
            .sum();

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
