//! Lazy-loading membership cache.
//!
//! One [`MembershipCache`] fronts one relation's membership set. The first
//! probe after the set expires (or before it has ever loaded) back-fills
//! the whole set from the data source in a single scan; every later probe
//! is one round trip against the store.
//!
//! Store failures surface as errors. A cache that cannot answer must never
//! be read as "the value is invalid".

use std::sync::Arc;
use std::time::Duration;

use refset_core::{FieldValue, RefsetResult, RelationRef};

use crate::set_key::SetKey;
use crate::traits::{DataSource, ReferencedEntity, SetStore};

/// Cache handle for one relation's membership set.
///
/// Holds the relation descriptor, the derived set key, the TTL applied on
/// every write, and the injected store. The data source is passed per call
/// so one cache can serve callers that route reads differently.
///
/// # Example
///
/// ```ignore
/// use refset_store::{relation, MembershipCache, MemorySetStore};
///
/// let store = Arc::new(MemorySetStore::new());
/// let cache = MembershipCache::new(relation::<Genre>("genre_id"), ttl, store);
///
/// cache.ensure_loaded(&source).await?;
/// let known = cache.contains(&FieldValue::from(42)).await?;
/// ```
#[derive(Clone)]
pub struct MembershipCache {
    relation: RelationRef,
    key: SetKey,
    ttl: Duration,
    store: Arc<dyn SetStore>,
}

impl MembershipCache {
    /// Create a cache handle for `relation`, writing through `store`.
    pub fn new(relation: RelationRef, ttl: Duration, store: Arc<dyn SetStore>) -> Self {
        let key = SetKey::for_relation(&relation);
        Self {
            relation,
            key,
            ttl,
            store,
        }
    }

    /// The relation this cache fronts.
    pub fn relation(&self) -> &RelationRef {
        &self.relation
    }

    /// The derived set key.
    pub fn key(&self) -> &SetKey {
        &self.key
    }

    /// TTL armed by every write into the set.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Make sure the set is live, back-filling it from `source` if not.
    ///
    /// Returns `true` if a back-fill ran. The back-fill scans every current
    /// value of the relation's field and merges them in one write, so
    /// concurrent callers at worst repeat the same merge.
    pub async fn ensure_loaded<T, D>(&self, source: &D) -> RefsetResult<bool>
    where
        T: ReferencedEntity,
        D: DataSource<T> + ?Sized,
    {
        let live = match self.store.exists(&self.key).await {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!(set = self.key.name(), error = %e, "membership store unavailable");
                return Err(e.into());
            }
        };
        if live {
            return Ok(false);
        }

        let members = source.scan_values(self.relation.field()).await?;
        let added = match self.store.add_all(&self.key, &members, self.ttl).await {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!(set = self.key.name(), error = %e, "membership back-fill write failed");
                return Err(e.into());
            }
        };
        tracing::debug!(
            set = self.key.name(),
            members = members.len(),
            added,
            "back-filled membership set"
        );
        Ok(true)
    }

    /// Whether `value` is in the set. An absent or expired set contains
    /// nothing; call [`MembershipCache::ensure_loaded`] first for a
    /// definitive answer.
    pub async fn contains(&self, value: &FieldValue) -> RefsetResult<bool> {
        Ok(self.store.contains(&self.key, value).await?)
    }

    /// Add one value to the set and re-arm its TTL.
    ///
    /// Used by the trust path after a value is verified against the source,
    /// so the next probe for it hits.
    pub async fn add(&self, value: &FieldValue) -> RefsetResult<()> {
        Ok(self.store.add(&self.key, value, self.ttl).await?)
    }
}
