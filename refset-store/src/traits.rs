//! Store and source abstractions.
//!
//! [`SetStore`] is the external set-membership store (wire protocol or
//! embedded). [`DataSource`] is the authoritative row store the sets are
//! back-filled from. Both are injected as trait objects so the cache layer
//! never owns a connection itself.

use std::time::Duration;

use async_trait::async_trait;
use refset_core::{FieldValue, RelationRef, SourceError, StoreError};

use crate::set_key::SetKey;

// ============================================================================
// Referenced Entity
// ============================================================================

/// An entity type that can be referenced by field value.
///
/// Implemented by the row types that validation resolves into. `field_value`
/// projects one named field; `from_field` rebuilds a lightweight instance
/// from a single validated field, for call sites that never touch the rest
/// of the row. Types that cannot be rebuilt from one field return `None` and
/// resolution falls back to a full fetch.
pub trait ReferencedEntity: Clone + Send + Sync + 'static {
    /// Stable entity name used in set names and error messages.
    fn entity_name() -> &'static str;

    /// Human-readable name for error messages. Defaults to the entity name.
    fn display_name() -> &'static str {
        Self::entity_name()
    }

    /// Project the named field out of this instance, if the type has it.
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    /// Rebuild an instance carrying only the named field.
    fn from_field(field: &str, value: &FieldValue) -> Option<Self>;
}

/// Build the relation descriptor for one field of an entity type.
pub fn relation<T: ReferencedEntity>(field: &str) -> RelationRef {
    RelationRef::new(T::entity_name(), field).with_display_name(T::display_name())
}

// ============================================================================
// Set Store
// ============================================================================

/// External set-membership store.
///
/// One named set per relation, holding every known value of the referenced
/// field. Sets expire as a whole; `add` re-arms the expiry of the set it
/// touches so hot sets stay warm.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Whether the set exists (has been back-filled and not yet expired).
    async fn exists(&self, key: &SetKey) -> Result<bool, StoreError>;

    /// Whether `member` is in the set. An absent set contains nothing.
    async fn contains(&self, key: &SetKey, member: &FieldValue) -> Result<bool, StoreError>;

    /// Add one member, creating the set if absent, and re-arm the expiry.
    async fn add(&self, key: &SetKey, member: &FieldValue, ttl: Duration) -> Result<(), StoreError>;

    /// Merge `members` into the set, creating it if absent, and re-arm the
    /// expiry. Returns how many members were not already present.
    async fn add_all(
        &self,
        key: &SetKey,
        members: &[FieldValue],
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    /// Point-in-time counters for observability.
    async fn stats(&self) -> Result<SetStoreStats, StoreError>;
}

/// Counters reported by [`SetStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetStoreStats {
    /// Membership probes that found the probed value.
    pub hits: u64,
    /// Membership probes that did not find the probed value.
    pub misses: u64,
    /// Live (unexpired) sets. Zero for stores that cannot enumerate.
    pub set_count: u64,
    /// Members across all live sets. Zero for stores that cannot enumerate.
    pub member_count: u64,
}

impl SetStoreStats {
    /// Fraction of probes that hit, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Data Source
// ============================================================================

/// Authoritative store of the referenced rows.
///
/// `scan_values` feeds the back-fill; `find_by_field` serves full-row
/// resolution and the fallback probe after a set miss.
#[async_trait]
pub trait DataSource<T: ReferencedEntity>: Send + Sync {
    /// Fetch the row whose `field` equals `value`, if one exists.
    async fn find_by_field(
        &self,
        field: &str,
        value: &FieldValue,
    ) -> Result<Option<T>, SourceError>;

    /// All current values of `field` across the entity's rows.
    async fn scan_values(&self, field: &str) -> Result<Vec<FieldValue>, SourceError>;
}
