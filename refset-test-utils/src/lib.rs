//! REFSET Test Utilities
//!
//! Centralized test infrastructure for the REFSET workspace:
//! - Proptest generators for field values, relations, and fixture rows
//! - Mock stores and sources with probe counting and failure injection
//! - Entity fixtures for common validation scenarios
//! - Custom assertions for REFSET-specific results

// Re-export the in-memory backends from their source crate
pub use refset_store::{InMemoryDataSource, MemorySetStore};

// Re-export core types for convenience
pub use refset_core::{
    ConfigError, FieldValue, RefsetError, RefsetResult, RelationConfig, RelationRef,
    ResolveMode, SourceError, StoreError, ValidationError, Validity, DEFAULT_CACHE_TTL,
};

pub use refset_store::{
    relation, DataSource, MembershipCache, ReferencedEntity, SetKey, SetStore, SetStoreStats,
};

// Re-export the entity fixtures at the root; most tests want them by name
pub use fixtures::{genre_rows, memory_store, short_ttl, track_rows, Genre, Track};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// MOCK STORES AND SOURCES
// ============================================================================

/// Row source that counts probes while delegating to an in-memory table.
///
/// Tests assert on `scan_count` / `find_count` to pin down exactly when the
/// authoritative store was consulted, and mutate rows behind the cache's
/// back to model drift between the source and the membership set.
pub struct CountingSource<T> {
    rows: InMemoryDataSource<T>,
    scans: AtomicUsize,
    finds: AtomicUsize,
}

impl<T: ReferencedEntity> CountingSource<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows: InMemoryDataSource::with_rows(rows),
            scans: AtomicUsize::new(0),
            finds: AtomicUsize::new(0),
        }
    }

    /// Full-field scans served so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Single-row lookups served so far.
    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Add a row without touching any membership set.
    pub fn insert(&self, row: T) {
        self.rows.insert(row);
    }

    /// Remove matching rows without touching any membership set.
    pub fn remove_where<F: Fn(&T) -> bool>(&self, pred: F) -> usize {
        self.rows.remove_where(pred)
    }
}

#[async_trait]
impl<T: ReferencedEntity> DataSource<T> for CountingSource<T> {
    async fn find_by_field(
        &self,
        field: &str,
        value: &FieldValue,
    ) -> Result<Option<T>, SourceError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.rows.find_by_field(field, value).await
    }

    async fn scan_values(&self, field: &str) -> Result<Vec<FieldValue>, SourceError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.rows.scan_values(field).await
    }
}

/// Set store whose every operation fails with [`StoreError::Unavailable`].
///
/// Models an unreachable backend. Callers are expected to surface the
/// failure rather than quietly shift probes onto the row source.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSetStore;

impl FailingSetStore {
    fn offline() -> StoreError {
        StoreError::Unavailable {
            reason: "set store offline".to_string(),
        }
    }
}

#[async_trait]
impl SetStore for FailingSetStore {
    async fn exists(&self, _key: &SetKey) -> Result<bool, StoreError> {
        Err(Self::offline())
    }

    async fn contains(&self, _key: &SetKey, _member: &FieldValue) -> Result<bool, StoreError> {
        Err(Self::offline())
    }

    async fn add(
        &self,
        _key: &SetKey,
        _member: &FieldValue,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(Self::offline())
    }

    async fn add_all(
        &self,
        _key: &SetKey,
        _members: &[FieldValue],
        _ttl: Duration,
    ) -> Result<u64, StoreError> {
        Err(Self::offline())
    }

    async fn stats(&self) -> Result<SetStoreStats, StoreError> {
        Err(Self::offline())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for REFSET value and fixture types.

    use super::*;
    use proptest::prelude::*;

    /// Lowercase identifier without underscores, so a set name built from
    /// two of them parses unambiguously.
    pub fn arb_ident() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,11}"
    }

    /// Printable member value, including the empty string.
    pub fn arb_member() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.:-]{0,32}"
    }

    /// Field value drawn from strings, integers, and UUIDs.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            arb_member().prop_map(FieldValue::new),
            any::<i64>().prop_map(FieldValue::from),
            any::<u64>().prop_map(FieldValue::from),
            any::<[u8; 16]>().prop_map(|b| FieldValue::from(Uuid::from_bytes(b))),
        ]
    }

    /// Relation descriptor with generated entity and field names.
    pub fn arb_relation() -> impl Strategy<Value = RelationRef> {
        (arb_ident(), arb_ident()).prop_map(|(entity, field)| RelationRef::new(entity, field))
    }

    /// Cache TTL from one millisecond up to an hour.
    pub fn arb_cache_ttl() -> impl Strategy<Value = Duration> {
        (1u64..3_600_000).prop_map(Duration::from_millis)
    }

    /// Single genre row with a bounded id.
    pub fn arb_genre() -> impl Strategy<Value = Genre> {
        (1u64..10_000, "[A-Z][a-z]{2,11}")
            .prop_map(|(genre_id, name)| Genre { genre_id, name })
    }

    /// Genre rows with distinct ids, sized for a quick back-fill.
    pub fn arb_genre_rows() -> impl Strategy<Value = Vec<Genre>> {
        prop::collection::hash_map(1u64..10_000, "[A-Z][a-z]{2,11}", 1..8).prop_map(|rows| {
            rows.into_iter()
                .map(|(genre_id, name)| Genre { genre_id, name })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and rows for common validation scenarios.

    use super::*;

    /// Music genre keyed by a numeric id.
    ///
    /// A genre can be rebuilt from its id alone, so it exercises the
    /// lightweight resolve path end to end.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Genre {
        pub genre_id: u64,
        pub name: String,
    }

    impl ReferencedEntity for Genre {
        fn entity_name() -> &'static str {
            "genre"
        }

        fn display_name() -> &'static str {
            "Genre"
        }

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            match field {
                "genre_id" => Some(FieldValue::from(self.genre_id)),
                "name" => Some(FieldValue::new(self.name.clone())),
                _ => None,
            }
        }

        fn from_field(field: &str, value: &FieldValue) -> Option<Self> {
            if field != "genre_id" {
                return None;
            }
            value.as_str().parse().ok().map(|genre_id| Genre {
                genre_id,
                name: String::new(),
            })
        }
    }

    /// Recording keyed by its ISRC.
    ///
    /// A track is more than any single field, so it refuses to synthesize
    /// and forces the degrade-to-fetch path.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Track {
        pub track_id: Uuid,
        pub isrc: String,
        pub title: String,
    }

    impl ReferencedEntity for Track {
        fn entity_name() -> &'static str {
            "track"
        }

        fn display_name() -> &'static str {
            "Track"
        }

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            match field {
                "track_id" => Some(FieldValue::from(self.track_id)),
                "isrc" => Some(FieldValue::new(self.isrc.clone())),
                "title" => Some(FieldValue::new(self.title.clone())),
                _ => None,
            }
        }

        fn from_field(_field: &str, _value: &FieldValue) -> Option<Self> {
            None
        }
    }

    /// Three well-known genres with ids 1 through 3.
    pub fn genre_rows() -> Vec<Genre> {
        vec![
            Genre {
                genre_id: 1,
                name: "Rock".to_string(),
            },
            Genre {
                genre_id: 2,
                name: "Jazz".to_string(),
            },
            Genre {
                genre_id: 3,
                name: "Ambient".to_string(),
            },
        ]
    }

    /// Three tracks with well-formed ISRCs.
    pub fn track_rows() -> Vec<Track> {
        vec![
            Track {
                track_id: Uuid::now_v7(),
                isrc: "USRC17607839".to_string(),
                title: "Harvest Moon".to_string(),
            },
            Track {
                track_id: Uuid::now_v7(),
                isrc: "GBAYE0601477".to_string(),
                title: "Starlight".to_string(),
            },
            Track {
                track_id: Uuid::now_v7(),
                isrc: "USSM19902991".to_string(),
                title: "Take Five".to_string(),
            },
        ]
    }

    /// Fresh in-memory set store.
    pub fn memory_store() -> Arc<MemorySetStore> {
        Arc::new(MemorySetStore::new())
    }

    /// TTL short enough to expire mid-test.
    pub fn short_ttl() -> Duration {
        Duration::from_millis(50)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for REFSET-specific results.

    use super::*;

    /// Assert that a RefsetResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a RefsetResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert a Valid membership verdict.
    #[track_caller]
    pub fn assert_valid(validity: Validity) {
        assert!(validity.is_valid(), "Expected Valid, got {:?}", validity);
    }

    /// Assert an Invalid membership verdict.
    #[track_caller]
    pub fn assert_invalid(validity: Validity) {
        assert!(validity.is_invalid(), "Expected Invalid, got {:?}", validity);
    }

    /// Assert that a RefsetResult is a Store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is an Unavailable store error.
    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Store(StoreError::Unavailable { .. })) => {}
            other => panic!("Expected Unavailable store error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is a Source error.
    #[track_caller]
    pub fn assert_source_error<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Source(_)) => {}
            other => panic!("Expected Source error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is an InvalidChoice validation error.
    #[track_caller]
    pub fn assert_invalid_choice<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Validation(ValidationError::InvalidChoice { .. })) => {}
            other => panic!("Expected InvalidChoice error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is an InvalidReference validation error.
    #[track_caller]
    pub fn assert_invalid_reference<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Validation(ValidationError::InvalidReference { .. })) => {}
            other => panic!("Expected InvalidReference error, got: {:?}", other),
        }
    }

    /// Assert that a RefsetResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RefsetResult<T>) {
        match result {
            Err(RefsetError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
