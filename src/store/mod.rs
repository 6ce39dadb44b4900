//! Storage abstraction for the nomenclature table and the learned catalog.
//!
//! The [`NomenclatureStore`] trait defines every query capability the
//! layered search engine and the classification orchestrator need,
//! enabling pluggable backends (SQLite in production, in-memory for
//! tests). Implementations must be `Send + Sync`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CatalogEntry;

/// A candidate nomenclature row returned from one search channel.
///
/// `raw_score` carries the backend's native score (FTS rank, trigram
/// similarity, or cosine similarity); the search layer normalizes it into
/// `[0, 1]` before fusion.
#[derive(Debug, Clone)]
pub struct NomenclatureHit {
    pub ncm_code: String,
    pub description: String,
    pub section: String,
    pub chapter: String,
    pub raw_score: f64,
}

/// Abstract store over nomenclature entries and catalog entries.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`fulltext_search`](NomenclatureStore::fulltext_search) | Stemmed full-text search over descriptions |
/// | [`trigram_search`](NomenclatureStore::trigram_search) | Fuzzy trigram similarity search |
/// | [`vector_search`](NomenclatureStore::vector_search) | Nearest-neighbor search over embeddings |
/// | [`code_prefix_search`](NomenclatureStore::code_prefix_search) | Exact/prefix lookup by code |
/// | [`catalog_search`](NomenclatureStore::catalog_search) | Text lookup in the learned catalog |
/// | [`catalog_lookup`](NomenclatureStore::catalog_lookup) | Batch fetch by `(provider, skus)` |
/// | [`bump_catalog_usage`](NomenclatureStore::bump_catalog_usage) | Advisory usage-counter increment |
#[async_trait]
pub trait NomenclatureStore: Send + Sync {
    /// Full-text search over nomenclature descriptions, best rank first.
    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<NomenclatureHit>>;

    /// Trigram similarity search; results below `min_similarity` are
    /// discarded at the source.
    async fn trigram_search(
        &self,
        query: &str,
        min_similarity: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>>;

    /// Cosine nearest-neighbor search over stored embeddings; results
    /// below `threshold` are discarded at the source.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>>;

    /// Prefix lookup by nomenclature code, code order.
    async fn code_prefix_search(&self, prefix: &str, limit: i64) -> Result<Vec<NomenclatureHit>>;

    /// Substring lookup over catalog SKUs and descriptions, scoped to a
    /// provider when one is known. Most-used entries first.
    async fn catalog_search(
        &self,
        provider_id: Option<&str>,
        query: &str,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>>;

    /// Batch fetch of catalog entries for a provider and a SKU list.
    async fn catalog_lookup(&self, provider_id: &str, skus: &[String])
        -> Result<Vec<CatalogEntry>>;

    /// Increment usage counters and refresh last-used timestamps.
    ///
    /// Advisory only: lost updates under concurrency are acceptable, the
    /// counter is used for ranking display, never for correctness.
    async fn bump_catalog_usage(&self, entry_ids: &[i64]) -> Result<()>;
}
