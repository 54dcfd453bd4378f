//! End-to-end validation flow tests
//!
//! Exercises the full chain against an in-memory set store and a counting
//! row source: relation -> membership cache -> validator -> resolver ->
//! reference field. Tests verify:
//! - One back-fill scan serves any number of probes until expiry
//! - Unknown values are double-checked once; the source stays quiet otherwise
//! - Rows born after the back-fill become visible via trust and write-through
//! - Expiry triggers a re-scan that picks up new rows
//! - Deleted rows stay members until their set expires
//! - Empty values touch neither the store nor the source
//! - A dead set store fails probes loudly instead of leaning on the source

use std::sync::Arc;
use std::thread::sleep;

use refset_test_utils::*;
use refset_validate::ReferenceField;

fn genre_field(
    config: RelationConfig,
    rows: Vec<Genre>,
) -> (ReferenceField<Genre>, Arc<CountingSource<Genre>>) {
    let source = Arc::new(CountingSource::new(rows));
    let field = ReferenceField::new(
        relation::<Genre>("genre_id"),
        config,
        memory_store(),
        source.clone(),
    )
    .expect("config should be valid");
    (field, source)
}

#[tokio::test]
async fn one_backfill_scan_serves_many_probes() {
    let (field, source) = genre_field(RelationConfig::new(), genre_rows());

    for id in [1u64, 2, 3, 1, 2, 3] {
        field
            .check(Some(&FieldValue::from(id)), None)
            .await
            .expect("known id should pass");
    }

    assert_eq!(source.scan_count(), 1);
    assert_eq!(source.find_count(), 0);
}

#[tokio::test]
async fn unknown_value_is_rejected_and_double_checked() {
    let (field, source) = genre_field(RelationConfig::new(), genre_rows());

    // Persistence-time check rejects from the set alone.
    let err = field
        .check(Some(&FieldValue::from(99)), None)
        .await
        .expect_err("unknown id should fail");
    assert!(matches!(
        err,
        RefsetError::Validation(ValidationError::InvalidReference { .. })
    ));
    assert_eq!(source.find_count(), 0);

    // Form-layer resolution double-checks the miss against the source.
    let err = field
        .to_entity(&FieldValue::from(99))
        .await
        .expect_err("unknown id should not resolve");
    assert!(matches!(
        err,
        RefsetError::Validation(ValidationError::InvalidChoice { .. })
    ));
    assert_eq!(source.find_count(), 1);

    // The misses did not disturb the set; known ids pass on the same scan.
    field
        .check(Some(&FieldValue::from(1)), None)
        .await
        .expect("known id should pass");
    assert_eq!(source.scan_count(), 1);
}

#[tokio::test]
async fn row_created_after_backfill_becomes_visible() {
    let (field, source) = genre_field(RelationConfig::new(), genre_rows());

    // Warm the set.
    field
        .check(Some(&FieldValue::from(1)), None)
        .await
        .expect("known id should pass");

    // A row born after the scan: the source finds it, the set learns it.
    source.insert(Genre {
        genre_id: 4,
        name: "Folk".to_string(),
    });
    let genre = field
        .to_entity(&FieldValue::from(4))
        .await
        .expect("fresh row should resolve")
        .expect("fresh row should exist");
    assert_eq!(genre.genre_id, 4);
    assert_eq!(source.find_count(), 1);

    // Written through: probing it again is pure cache.
    field
        .check(Some(&FieldValue::from(4)), None)
        .await
        .expect("written-through id should pass");
    assert_eq!(source.scan_count(), 1);
    assert_eq!(source.find_count(), 1);
}

#[tokio::test]
async fn uncommitted_candidate_is_trusted() {
    let (field, source) = genre_field(RelationConfig::new(), genre_rows());
    let pending = Genre {
        genre_id: 7,
        name: "Dub".to_string(),
    };

    // Not in the source yet; the instance itself vouches for the value.
    field
        .check(Some(&FieldValue::from(7)), Some(&pending))
        .await
        .expect("candidate-backed id should pass");
    assert_eq!(source.find_count(), 0);

    // The trust was written through to the set.
    field
        .check(Some(&FieldValue::from(7)), None)
        .await
        .expect("trusted id should pass");
    assert_eq!(source.scan_count(), 1);
}

#[tokio::test]
async fn repeated_trust_inserts_converge() {
    let store = memory_store();
    let source = Arc::new(CountingSource::new(genre_rows()));
    let field = ReferenceField::new(
        relation::<Genre>("genre_id"),
        RelationConfig::new(),
        store.clone(),
        source.clone(),
    )
    .expect("config should be valid");
    let pending = Genre {
        genre_id: 7,
        name: "Dub".to_string(),
    };

    // The first check misses and trusts; later checks hit the set.
    for _ in 0..3 {
        field
            .check(Some(&FieldValue::from(7)), Some(&pending))
            .await
            .expect("candidate-backed id should pass");
    }

    let stats = store.stats().await.expect("stats should succeed");
    assert_eq!(stats.set_count, 1);
    assert_eq!(stats.member_count, 4);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn expiry_rescans_and_picks_up_new_rows() {
    let (field, source) = genre_field(
        RelationConfig::new().with_cache_ttl(short_ttl()),
        genre_rows(),
    );

    field
        .check(Some(&FieldValue::from(1)), None)
        .await
        .expect("known id should pass");
    assert_eq!(source.scan_count(), 1);

    // Inserted while the set is live: invisible to plain probes.
    source.insert(Genre {
        genre_id: 5,
        name: "Salsa".to_string(),
    });
    field
        .check(Some(&FieldValue::from(5)), None)
        .await
        .expect_err("unscanned id should fail while the set is live");

    sleep(short_ttl() * 2);

    // The dead set forces a second scan, which includes the new row.
    field
        .check(Some(&FieldValue::from(5)), None)
        .await
        .expect("id should pass after the re-scan");
    assert_eq!(source.scan_count(), 2);
}

#[tokio::test]
async fn deleted_row_stays_member_until_expiry() {
    let (field, source) = genre_field(
        RelationConfig::new().with_cache_ttl(short_ttl()),
        genre_rows(),
    );

    field
        .check(Some(&FieldValue::from(2)), None)
        .await
        .expect("known id should pass");
    source.remove_where(|g| g.genre_id == 2);

    // Membership outlives the row for the rest of the TTL.
    field
        .check(Some(&FieldValue::from(2)), None)
        .await
        .expect("member should outlive its row until expiry");

    sleep(short_ttl() * 2);

    let err = field
        .check(Some(&FieldValue::from(2)), None)
        .await
        .expect_err("re-scan should drop the deleted row");
    assert!(matches!(
        err,
        RefsetError::Validation(ValidationError::InvalidReference { .. })
    ));
    assert_eq!(source.scan_count(), 2);
}

#[tokio::test]
async fn empty_value_short_circuits() {
    let store = memory_store();
    let source = Arc::new(CountingSource::new(genre_rows()));
    let field = ReferenceField::new(
        relation::<Genre>("genre_id"),
        RelationConfig::new().with_allow_blank(true),
        store.clone(),
        source.clone(),
    )
    .expect("config should be valid");

    let resolved = field
        .to_entity(&FieldValue::from(""))
        .await
        .expect("empty input should convert");
    assert_eq!(resolved, None);

    field
        .check(Some(&FieldValue::from("")), None)
        .await
        .expect("blank should pass when allowed");

    // Neither call reached the store, let alone the source.
    let stats = store.stats().await.expect("stats should succeed");
    assert_eq!(stats.set_count, 0);
    assert_eq!(stats.hits + stats.misses, 0);
    assert_eq!(source.scan_count(), 0);
    assert_eq!(source.find_count(), 0);
}

#[tokio::test]
async fn fetch_full_returns_the_authoritative_row() {
    let (field, source) = genre_field(
        RelationConfig::new().with_resolve_mode(ResolveMode::FetchFull),
        genre_rows(),
    );

    let genre = field
        .to_entity(&FieldValue::from(2))
        .await
        .expect("known id should resolve")
        .expect("known id should exist");
    assert_eq!(genre.name, "Jazz");
    assert_eq!(source.find_count(), 1);
}

#[tokio::test]
async fn track_field_degrades_to_fetch() {
    let source = Arc::new(CountingSource::new(track_rows()));
    let field = ReferenceField::new(
        relation::<Track>("isrc"),
        RelationConfig::new(),
        memory_store(),
        source.clone(),
    )
    .expect("config should be valid");
    let isrc = track_rows()[0].isrc.clone();

    // Lightweight mode cannot rebuild a track from its ISRC alone, so the
    // hit still fetches the full row.
    let track = field
        .to_entity(&FieldValue::from(isrc.as_str()))
        .await
        .expect("known isrc should resolve")
        .expect("known isrc should exist");
    assert_eq!(track.title, "Harvest Moon");
    assert_eq!(source.scan_count(), 1);
    assert_eq!(source.find_count(), 1);
}

#[tokio::test]
async fn dead_store_fails_loudly() {
    let source = Arc::new(CountingSource::new(genre_rows()));
    let field = ReferenceField::new(
        relation::<Genre>("genre_id"),
        RelationConfig::new(),
        Arc::new(FailingSetStore),
        source.clone(),
    )
    .expect("config should be valid");

    let result = field.check(Some(&FieldValue::from(1)), None).await;
    assertions::assert_store_unavailable(&result);

    // A dead store must not quietly shift every probe onto the source.
    assert_eq!(source.scan_count(), 0);
    assert_eq!(source.find_count(), 0);
}
