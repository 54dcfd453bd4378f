//! REFSET Store - Membership Sets
//!
//! Set-membership stores and the lazy cache layer over them: one named set
//! per referenced relation, back-filled from the authoritative data source
//! and expired as a whole. The validation protocol that consumes these
//! sets lives in refset-validate.

pub mod lmdb_backend;
pub mod membership;
pub mod memory;
pub mod redis_backend;
pub mod set_key;
pub mod traits;

pub use lmdb_backend::{LmdbSetStore, LmdbStoreError};
pub use membership::MembershipCache;
pub use memory::MemorySetStore;
pub use redis_backend::{RedisSetStore, RedisStoreError};
pub use set_key::{DecodedKey, SetKey};
pub use traits::{relation, DataSource, ReferencedEntity, SetStore, SetStoreStats};

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refset_core::{FieldValue, SourceError};

/// Absolute expiry for a TTL armed now.
///
/// Saturates at the maximum representable instant for TTLs beyond chrono's
/// range, which in practice means "never expires".
pub(crate) fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .map(|d| Utc::now() + d)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// IN-MEMORY DATA SOURCE
// ============================================================================

/// In-memory [`DataSource`] backed by a row vector.
///
/// Serves tests, fixtures, and small static relations that never leave the
/// process. Rows can be added and removed at runtime to model a moving
/// authoritative store.
pub struct InMemoryDataSource<T> {
    rows: RwLock<Vec<T>>,
}

impl<T: ReferencedEntity> InMemoryDataSource<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn with_rows(rows: Vec<T>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Add a row.
    pub fn insert(&self, row: T) {
        self.rows.write().unwrap().push(row);
    }

    /// Remove every row matching `pred`, returning how many were removed.
    pub fn remove_where<F: Fn(&T) -> bool>(&self, pred: F) -> usize {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|row| !pred(row));
        before - rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }
}

impl<T: ReferencedEntity> Default for InMemoryDataSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: ReferencedEntity> DataSource<T> for InMemoryDataSource<T> {
    async fn find_by_field(
        &self,
        field: &str,
        value: &FieldValue,
    ) -> Result<Option<T>, SourceError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .find(|row| row.field_value(field).as_ref() == Some(value))
            .cloned())
    }

    async fn scan_values(&self, field: &str) -> Result<Vec<FieldValue>, SourceError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter_map(|row| row.field_value(field))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Label {
        label_id: u32,
        name: String,
    }

    impl ReferencedEntity for Label {
        fn entity_name() -> &'static str {
            "label"
        }

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            match field {
                "label_id" => Some(FieldValue::from(self.label_id)),
                "name" => Some(FieldValue::from(self.name.as_str())),
                _ => None,
            }
        }

        fn from_field(field: &str, value: &FieldValue) -> Option<Self> {
            match field {
                "label_id" => value.as_str().parse().ok().map(|label_id| Label {
                    label_id,
                    name: String::new(),
                }),
                _ => None,
            }
        }
    }

    fn labels() -> Vec<Label> {
        vec![
            Label {
                label_id: 1,
                name: "Blue Note".to_string(),
            },
            Label {
                label_id: 2,
                name: "Verve".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let source = InMemoryDataSource::with_rows(labels());

        let found = source
            .find_by_field("label_id", &FieldValue::from(2))
            .await
            .expect("find_by_field should succeed");
        assert_eq!(found.map(|l| l.name), Some("Verve".to_string()));

        let missing = source
            .find_by_field("label_id", &FieldValue::from(9))
            .await
            .expect("find_by_field should succeed");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_find_by_unknown_field() {
        let source = InMemoryDataSource::with_rows(labels());
        let found = source
            .find_by_field("catalog", &FieldValue::from(1))
            .await
            .expect("find_by_field should succeed");
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_scan_values() {
        let source = InMemoryDataSource::with_rows(labels());
        let values = source
            .scan_values("label_id")
            .await
            .expect("scan_values should succeed");
        assert_eq!(values, vec![FieldValue::from(1), FieldValue::from(2)]);
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let source = InMemoryDataSource::with_rows(labels());
        source.insert(Label {
            label_id: 3,
            name: "ECM".to_string(),
        });
        assert_eq!(source.len(), 3);

        let removed = source.remove_where(|l| l.label_id == 1);
        assert_eq!(removed, 1);
        assert_eq!(source.len(), 2);

        let missing = source
            .find_by_field("label_id", &FieldValue::from(1))
            .await
            .expect("find_by_field should succeed");
        assert_eq!(missing, None);
    }

    #[test]
    fn test_expiry_saturates() {
        let far = expiry_from_now(Duration::from_secs(u64::MAX));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);

        let near = expiry_from_now(Duration::from_secs(60));
        assert!(near > Utc::now());
        assert!(near < DateTime::<Utc>::MAX_UTC);
    }
}
