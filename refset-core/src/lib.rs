//! REFSET Core - Relation Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no cache or store logic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// VALUE TYPES
// ============================================================================

/// Default time-to-live for a membership set: 3 hours.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Canonical string form of a referenced field value.
///
/// Membership sets hold stringified values, so equality between a candidate
/// and a stored member must be string equality. Routing every id shape
/// (integer keys, UUIDs, natural keys) through `FieldValue` keeps the
/// canonical form in one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldValue(String);

impl FieldValue {
    /// Create a field value from anything string-like.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty value (skipped by validation).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume and return the canonical string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// RELATION DESCRIPTOR
// ============================================================================

/// Descriptor of a referenced relation: which entity type and which of its
/// fields candidate values are checked against.
///
/// The relation is configured explicitly at construction. Nothing is inferred
/// from runtime type names, so renaming a Rust type never silently changes
/// which cached set a validator reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    entity: String,
    field: String,
    display_name: String,
}

impl RelationRef {
    /// Create a relation descriptor for `entity.field`.
    ///
    /// The display name used in validation messages defaults to the entity
    /// name; override it with [`RelationRef::with_display_name`].
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        let entity = entity.into();
        let display_name = entity.clone();
        Self {
            entity,
            field: field.into(),
            display_name,
        }
    }

    /// Override the human-readable name used in validation messages.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Name of the referenced entity type (cache-namespace identity).
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Name of the referenced field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Human-readable entity name for error messages.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Outcome of a membership validation.
///
/// Distinct from transport errors: an unreachable store is an `Err`, a value
/// that simply is not in the referenced relation is `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// The candidate value exists in the referenced relation (or was trusted
    /// from a caller-supplied instance).
    Valid,
    /// The candidate value is not known to the referenced relation.
    Invalid,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Validity::Invalid)
    }
}

/// How an instance resolver materializes a referenced entity on a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveMode {
    /// Synthesize a lightweight instance carrying only the matched field.
    /// No data-store read on a cache hit.
    Lightweight,
    /// Fetch the full row from the data store even on a cache hit, for
    /// callers that need every attribute.
    FetchFull,
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Per-relation configuration for validation and caching behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Time-to-live applied to the membership set. Every insert re-arms the
    /// whole set's expiry to this duration.
    pub cache_ttl: Duration,
    /// Resolution strategy on a cache hit.
    pub resolve_mode: ResolveMode,
    /// Whether a missing (`None`) value clears the null gate. A `None`
    /// still counts as blank.
    pub allow_null: bool,
    /// Whether a blank value (`None` or empty) passes validation.
    pub allow_blank: bool,
    /// Parent-link relations are maintained by the persistence layer itself
    /// and are exempt from validation.
    pub parent_link: bool,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            resolve_mode: ResolveMode::Lightweight,
            allow_null: false,
            allow_blank: false,
            parent_link: false,
        }
    }
}

impl RelationConfig {
    /// Create a new relation config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the membership set TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the resolve mode.
    pub fn with_resolve_mode(mut self, mode: ResolveMode) -> Self {
        self.resolve_mode = mode;
        self
    }

    /// Allow or reject missing values.
    pub fn with_allow_null(mut self, allow: bool) -> Self {
        self.allow_null = allow;
        self
    }

    /// Allow or reject empty values.
    pub fn with_allow_blank(mut self, allow: bool) -> Self {
        self.allow_blank = allow;
        self
    }

    /// Mark this relation as a parent link (exempt from validation).
    pub fn with_parent_link(mut self, parent_link: bool) -> Self {
        self.parent_link = parent_link;
        self
    }

    /// Validate the configuration.
    ///
    /// A zero TTL would expire sets the moment they are written, turning
    /// every validation into a full back-fill.
    pub fn validate(&self) -> RefsetResult<()> {
        if self.cache_ttl.is_zero() {
            return Err(RefsetError::Config(ConfigError::InvalidValue {
                field: "cache_ttl".to_string(),
                value: format!("{:?}", self.cache_ttl),
                reason: "cache_ttl must be positive".to_string(),
            }));
        }
        Ok(())
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Set store (key-value) errors.
///
/// These always propagate to the caller: an unreachable store fails the
/// validation attempt loudly rather than silently degrading to a data-store
/// read on every call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Set store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Set store operation failed: {reason}")]
    Backend { reason: String },

    #[error("Corrupt set store record: {reason}")]
    Decode { reason: String },
}

/// Data store (source of truth) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Data source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed for {entity}.{field}: {reason}")]
    QueryFailed {
        entity: String,
        field: String,
        reason: String,
    },
}

/// Validation errors surfaced to callers.
///
/// A value that is merely absent from the referenced relation is NOT an
/// error at the protocol level; it becomes one of these only at the field
/// binding, where the caller expects a verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Select a valid choice: {value} is not one of the available choices")]
    InvalidChoice { value: FieldValue },

    #[error("{entity} instance with {field} {value} does not exist")]
    InvalidReference {
        entity: String,
        field: String,
        value: FieldValue,
    },

    #[error("Field {field} cannot be null")]
    Null { field: String },

    #[error("Field {field} cannot be blank")]
    Blank { field: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all REFSET errors.
#[derive(Debug, Clone, Error)]
pub enum RefsetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for REFSET operations.
pub type RefsetResult<T> = Result<T, RefsetError>;

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
