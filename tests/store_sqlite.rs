//! Integration tests for the SQLite-backed store: schema migrations plus
//! the four query channels and the learned catalog.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;

use ncm_harness::migrate;
use ncm_harness::models::NomenclatureEntry;
use ncm_harness::store::sqlite::SqliteStore;
use ncm_harness::store::NomenclatureStore;

async fn test_pool(tmp: &TempDir) -> SqlitePool {
    let path = tmp.path().join("ncm.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

fn entry(code: &str, description: &str, embedding: Option<Vec<f32>>) -> NomenclatureEntry {
    NomenclatureEntry {
        ncm_code: code.to_string(),
        description: description.to_string(),
        section: "XVI".to_string(),
        chapter: "84".to_string(),
        embedding,
    }
}

async fn seeded_store(tmp: &TempDir) -> SqliteStore {
    let store = SqliteStore::new(test_pool(tmp).await);
    store
        .insert_nomenclature(&entry(
            "8471.30.12",
            "portable automatic data processing machines",
            Some(vec![1.0, 0.0]),
        ))
        .await
        .unwrap();
    store
        .insert_nomenclature(&entry(
            "8471.41.10",
            "digital processing units for computers",
            Some(vec![0.9, 0.435_889_9]),
        ))
        .await
        .unwrap();
    store
        .insert_nomenclature(&entry(
            "4016.93.00",
            "gaskets and seals of vulcanized rubber",
            Some(vec![0.0, 1.0]),
        ))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pool = test_pool(&tmp).await;
    migrate::run_migrations(&pool).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn fulltext_search_stems_and_ranks() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;

    // "computer" must reach "computers" through the porter stemmer.
    let hits = store.fulltext_search("computer processing", 10).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].ncm_code, "8471.41.10");

    // Punctuation-heavy input never reaches the FTS parser raw.
    let hits = store.fulltext_search("\"processing\" (units)", 10).await.unwrap();
    assert!(!hits.is_empty());

    let none = store.fulltext_search("!!!", 10).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn trigram_search_applies_threshold() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;

    let hits = store
        .trigram_search("gaskets and seals of vulcanised rubber", 0.4, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].ncm_code, "4016.93.00");
    assert!(hits[0].raw_score >= 0.4);

    let none = store.trigram_search("frozen shrimp", 0.4, 10).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn vector_search_applies_threshold_and_orders() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;

    let hits = store.vector_search(&[1.0, 0.0], 0.3, 10).await.unwrap();
    let codes: Vec<&str> = hits.iter().map(|h| h.ncm_code.as_str()).collect();
    assert_eq!(codes, vec!["8471.30.12", "8471.41.10"]);
    assert!(hits[0].raw_score > hits[1].raw_score);
}

#[tokio::test]
async fn code_prefix_search_matches_partials() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;

    let hits = store.code_prefix_search("8471", 10).await.unwrap();
    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert!(hit.ncm_code.starts_with("8471"));
        assert_eq!(hit.raw_score, 1.0);
    }

    let deeper = store.code_prefix_search("8471.30", 10).await.unwrap();
    assert_eq!(deeper.len(), 1);
}

#[tokio::test]
async fn catalog_learns_and_counts_usage() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::new(test_pool(&tmp).await);

    store
        .confirm_classification("prov-1", "X1", "portable computers", "8471.30.12")
        .await
        .unwrap();
    store
        .confirm_classification("prov-1", "X1", "portable computers", "8471.30.12")
        .await
        .unwrap();
    store
        .confirm_classification("prov-2", "X1", "something else", "4016.93.00")
        .await
        .unwrap();

    // Lookup is provider-scoped and batch-shaped.
    let entries = store
        .catalog_lookup("prov-1", &["X1".to_string(), "X2".to_string()])
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ncm_code, "8471.30.12");
    assert_eq!(entries[0].use_count, 2);

    store.bump_catalog_usage(&[entries[0].id]).await.unwrap();
    let entries = store.catalog_lookup("prov-1", &["X1".to_string()]).await.unwrap();
    assert_eq!(entries[0].use_count, 3);

    // Substring search sees the learned description.
    let found = store
        .catalog_search(Some("prov-1"), "portable", 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let other_provider = store
        .catalog_search(Some("prov-2"), "portable", 10)
        .await
        .unwrap();
    assert!(other_provider.is_empty());
}
