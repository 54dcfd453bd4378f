//! REFSET Validate - Reference Validation Protocol
//!
//! Validates that a field value refers to an existing row of a referenced
//! relation, at cache speed. Three layers compose over the membership sets
//! in refset-store:
//!
//! - [`Validator`] answers "does this value exist?" from the set, with an
//!   optimistic trust path for in-memory candidate instances.
//! - [`InstanceResolver`] turns a valid value into an entity instance,
//!   either synthesized from the value alone or fetched in full.
//! - [`ReferenceField`] binds a relation and its [`RelationConfig`] into
//!   the form-layer (`to_entity`) and persistence-layer (`check`) calls.
//!
//! # Example
//!
//! ```ignore
//! use refset_core::{FieldValue, RelationConfig};
//! use refset_store::{relation, LmdbSetStore};
//! use refset_validate::ReferenceField;
//!
//! let store = Arc::new(LmdbSetStore::new("/var/lib/refset", 100)?);
//! let field = ReferenceField::new(
//!     relation::<Genre>("genre_id"),
//!     RelationConfig::new(),
//!     store,
//!     source,
//! )?;
//!
//! // Form-layer conversion: raw input to entity.
//! let genre = field.to_entity(&FieldValue::from("42")).await?;
//!
//! // Persistence-time validation before a save.
//! field.check(Some(&FieldValue::from("42")), None).await?;
//! ```

use std::sync::Arc;

use refset_core::{
    FieldValue, RefsetResult, RelationConfig, RelationRef, ResolveMode, ValidationError, Validity,
};
use refset_store::{DataSource, MembershipCache, ReferencedEntity, SetStore};

// ============================================================================
// VALIDATOR
// ============================================================================

/// Existence checker for one relation.
///
/// Answers from the membership set. A value missing from the set is only
/// `Invalid` if the caller cannot vouch for it: when a candidate instance
/// is supplied, its own field value is trusted and written through to the
/// set. That covers rows created in the caller's still-uncommitted
/// transaction, which no back-fill can have seen.
pub struct Validator<T: ReferencedEntity> {
    cache: MembershipCache,
    source: Arc<dyn DataSource<T>>,
}

impl<T: ReferencedEntity> Validator<T> {
    pub fn new(cache: MembershipCache, source: Arc<dyn DataSource<T>>) -> Self {
        Self { cache, source }
    }

    /// The relation this validator checks against.
    pub fn relation(&self) -> &RelationRef {
        self.cache.relation()
    }

    /// The membership cache backing this validator.
    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }

    /// The authoritative data source.
    pub fn source(&self) -> &Arc<dyn DataSource<T>> {
        &self.source
    }

    /// Check whether `value` refers to an existing row.
    ///
    /// Loads the membership set if needed, then probes it. On a miss with a
    /// `candidate` instance present, the instance's own field value is
    /// added to the set (re-arming its TTL) and the value counts as valid.
    pub async fn validate(
        &self,
        value: &FieldValue,
        candidate: Option<&T>,
    ) -> RefsetResult<Validity> {
        self.cache.ensure_loaded(self.source.as_ref()).await?;

        if self.cache.contains(value).await? {
            return Ok(Validity::Valid);
        }

        if let Some(candidate) = candidate {
            if let Some(own) = candidate.field_value(self.relation().field()) {
                self.cache.add(&own).await?;
                tracing::debug!(
                    set = self.cache.key().name(),
                    value = %own,
                    "trusted candidate instance on set miss"
                );
                return Ok(Validity::Valid);
            }
            // A candidate that does not carry the field vouches for nothing.
        }

        Ok(Validity::Invalid)
    }
}

impl<T: ReferencedEntity> Clone for Validator<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

// ============================================================================
// INSTANCE RESOLVER
// ============================================================================

/// Resolves a field value into an entity instance.
///
/// On a set hit, `ResolveMode` decides whether the instance is synthesized
/// from the value alone (`Lightweight`) or fetched in full (`FetchFull`).
/// On a set miss, the data source gets the last word: a row inserted after
/// the back-fill still resolves, and is written through to the set.
pub struct InstanceResolver<T: ReferencedEntity> {
    validator: Validator<T>,
    mode: ResolveMode,
}

impl<T: ReferencedEntity> InstanceResolver<T> {
    pub fn new(validator: Validator<T>, mode: ResolveMode) -> Self {
        Self { validator, mode }
    }

    pub fn relation(&self) -> &RelationRef {
        self.validator.relation()
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn validator(&self) -> &Validator<T> {
        &self.validator
    }

    /// Resolve `value` to an instance, or `None` if it refers to nothing.
    ///
    /// An empty value short-circuits to `Ok(None)` without touching the
    /// store or the source. A vanished row under `FetchFull` also resolves
    /// to `Ok(None)`: the set is intentionally left as-is, since members
    /// are never unlearned inside a TTL window.
    pub async fn resolve(&self, value: &FieldValue) -> RefsetResult<Option<T>> {
        if value.is_empty() {
            return Ok(None);
        }

        match self.validator.validate(value, None).await? {
            Validity::Invalid => self.probe_source(value).await,
            Validity::Valid => match self.mode {
                ResolveMode::Lightweight => {
                    match T::from_field(self.relation().field(), value) {
                        Some(instance) => Ok(Some(instance)),
                        // The type cannot be rebuilt from one field.
                        None => self.fetch_full(value).await,
                    }
                }
                ResolveMode::FetchFull => self.fetch_full(value).await,
            },
        }
    }

    /// Set miss: ask the source directly and write a hit through to the set.
    async fn probe_source(&self, value: &FieldValue) -> RefsetResult<Option<T>> {
        let field = self.relation().field();
        match self.validator.source().find_by_field(field, value).await? {
            Some(entity) => {
                let canonical = entity.field_value(field).unwrap_or_else(|| value.clone());
                self.validator.cache().add(&canonical).await?;
                tracing::debug!(
                    set = self.validator.cache().key().name(),
                    value = %canonical,
                    "added source-verified value to membership set"
                );
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    async fn fetch_full(&self, value: &FieldValue) -> RefsetResult<Option<T>> {
        let field = self.relation().field();
        Ok(self.validator.source().find_by_field(field, value).await?)
    }
}

impl<T: ReferencedEntity> Clone for InstanceResolver<T> {
    fn clone(&self) -> Self {
        Self {
            validator: self.validator.clone(),
            mode: self.mode,
        }
    }
}

// ============================================================================
// REFERENCE FIELD
// ============================================================================

/// Field binding for one reference: a [`RelationRef`] plus its
/// [`RelationConfig`], delegating the actual work to [`Validator`] and
/// [`InstanceResolver`].
///
/// `to_entity` is the form-layer call (raw input in, entity out);
/// `check` is the persistence-layer call (verdict before a save). The gates
/// differ: form input that matches nothing is an invalid choice, while a
/// persisted value that matches nothing is an invalid reference.
pub struct ReferenceField<T: ReferencedEntity> {
    config: RelationConfig,
    resolver: InstanceResolver<T>,
}

impl<T: ReferencedEntity> ReferenceField<T> {
    /// Bind `relation` with `config` over an injected store and source.
    ///
    /// Fails if the configuration is invalid (e.g. a zero TTL).
    pub fn new(
        relation: RelationRef,
        config: RelationConfig,
        store: Arc<dyn SetStore>,
        source: Arc<dyn DataSource<T>>,
    ) -> RefsetResult<Self> {
        config.validate()?;
        let cache = MembershipCache::new(relation, config.cache_ttl, store);
        let validator = Validator::new(cache, source);
        let resolver = InstanceResolver::new(validator, config.resolve_mode);
        Ok(Self { config, resolver })
    }

    pub fn relation(&self) -> &RelationRef {
        self.resolver.relation()
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    pub fn resolver(&self) -> &InstanceResolver<T> {
        &self.resolver
    }

    pub fn validator(&self) -> &Validator<T> {
        self.resolver.validator()
    }

    /// Form-layer conversion: raw input to entity.
    ///
    /// Empty input means "no reference" and converts to `Ok(None)`. Input
    /// that resolves to nothing is rejected as an invalid choice.
    pub async fn to_entity(&self, raw: &FieldValue) -> RefsetResult<Option<T>> {
        if raw.is_empty() {
            return Ok(None);
        }
        match self.resolver.resolve(raw).await? {
            Some(entity) => Ok(Some(entity)),
            None => Err(ValidationError::InvalidChoice { value: raw.clone() }.into()),
        }
    }

    /// Persistence-time validation of `value` before a save.
    ///
    /// Parent-link relations are maintained by the persistence layer itself
    /// and pass unconditionally. A `None` must clear the null gate and
    /// then, together with the empty value, the blank gate. Everything else
    /// must refer to an existing row, where `candidate` (the in-memory
    /// instance being saved) can vouch for a row the back-fill has not
    /// seen.
    pub async fn check(
        &self,
        value: Option<&FieldValue>,
        candidate: Option<&T>,
    ) -> RefsetResult<()> {
        if self.config.parent_link {
            return Ok(());
        }

        if value.is_none() && !self.config.allow_null {
            return Err(ValidationError::Null {
                field: self.relation().field().to_string(),
            }
            .into());
        }

        // The null gate alone does not admit a None: it still counts as
        // blank, exactly like the empty value.
        let value = match value {
            Some(value) if !value.is_empty() => value,
            _ => {
                return if self.config.allow_blank {
                    Ok(())
                } else {
                    Err(ValidationError::Blank {
                        field: self.relation().field().to_string(),
                    }
                    .into())
                };
            }
        };

        match self.validator().validate(value, candidate).await? {
            Validity::Valid => Ok(()),
            Validity::Invalid => Err(ValidationError::InvalidReference {
                entity: self.relation().display_name().to_string(),
                field: self.relation().field().to_string(),
                value: value.clone(),
            }
            .into()),
        }
    }
}

impl<T: ReferencedEntity> Clone for ReferenceField<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
