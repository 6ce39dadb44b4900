//! In-memory [`NomenclatureStore`] implementation for tests.
//!
//! Uses `Vec` behind `std::sync::RwLock` for thread safety. Full-text
//! search is term-overlap counting, vector search is brute-force cosine
//! similarity. Per-channel call counters let tests assert which layers
//! ran (e.g. the exact-code short-circuit makes no layer calls).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::models::{CatalogEntry, NomenclatureEntry};
use crate::trigram::trigram_similarity;

use super::{NomenclatureHit, NomenclatureStore};

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    nomenclature: RwLock<Vec<NomenclatureEntry>>,
    catalog: RwLock<Vec<CatalogEntry>>,
    pub fulltext_calls: AtomicUsize,
    pub trigram_calls: AtomicUsize,
    pub vector_calls: AtomicUsize,
    pub catalog_search_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nomenclature(&self, entry: NomenclatureEntry) {
        self.nomenclature.write().unwrap().push(entry);
    }

    pub fn add_catalog(&self, entry: CatalogEntry) {
        self.catalog.write().unwrap().push(entry);
    }

    /// Total layer-search calls (everything except catalog lookups).
    pub fn layer_calls(&self) -> usize {
        self.fulltext_calls.load(Ordering::SeqCst)
            + self.trigram_calls.load(Ordering::SeqCst)
            + self.vector_calls.load(Ordering::SeqCst)
    }

    pub fn catalog_use_count(&self, id: i64) -> Option<i64> {
        self.catalog
            .read()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.use_count)
    }
}

fn hit_from(entry: &NomenclatureEntry, raw_score: f64) -> NomenclatureHit {
    NomenclatureHit {
        ncm_code: entry.ncm_code.clone(),
        description: entry.description.clone(),
        section: entry.section.clone(),
        chapter: entry.chapter.clone(),
        raw_score,
    }
}

fn sort_and_truncate(mut hits: Vec<NomenclatureHit>, limit: i64) -> Vec<NomenclatureHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.ncm_code.cmp(&b.ncm_code))
    });
    hits.truncate(limit as usize);
    hits
}

#[async_trait]
impl NomenclatureStore for MemoryStore {
    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<NomenclatureHit>> {
        self.fulltext_calls.fetch_add(1, Ordering::SeqCst);

        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.nomenclature.read().unwrap();
        let hits: Vec<NomenclatureHit> = entries
            .iter()
            .filter_map(|entry| {
                let text = entry.description.to_lowercase();
                let matches = terms.iter().filter(|t| text.contains(*t)).count();
                (matches > 0).then(|| hit_from(entry, matches as f64))
            })
            .collect();

        Ok(sort_and_truncate(hits, limit))
    }

    async fn trigram_search(
        &self,
        query: &str,
        min_similarity: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>> {
        self.trigram_calls.fetch_add(1, Ordering::SeqCst);

        let entries = self.nomenclature.read().unwrap();
        let hits: Vec<NomenclatureHit> = entries
            .iter()
            .filter_map(|entry| {
                let sim = trigram_similarity(query, &entry.description);
                (sim >= min_similarity).then(|| hit_from(entry, sim))
            })
            .collect();

        Ok(sort_and_truncate(hits, limit))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);

        let entries = self.nomenclature.read().unwrap();
        let hits: Vec<NomenclatureHit> = entries
            .iter()
            .filter_map(|entry| {
                let embedding = entry.embedding.as_ref()?;
                let sim = cosine_similarity(query_vec, embedding) as f64;
                (sim >= threshold).then(|| hit_from(entry, sim))
            })
            .collect();

        Ok(sort_and_truncate(hits, limit))
    }

    async fn code_prefix_search(&self, prefix: &str, limit: i64) -> Result<Vec<NomenclatureHit>> {
        let entries = self.nomenclature.read().unwrap();
        let mut hits: Vec<NomenclatureHit> = entries
            .iter()
            .filter(|entry| entry.ncm_code.starts_with(prefix))
            .map(|entry| hit_from(entry, 1.0))
            .collect();
        hits.sort_by(|a, b| a.ncm_code.cmp(&b.ncm_code));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn catalog_search(
        &self,
        provider_id: Option<&str>,
        query: &str,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>> {
        self.catalog_search_calls.fetch_add(1, Ordering::SeqCst);

        let needle = query.to_lowercase();
        let entries = self.catalog.read().unwrap();
        let mut matches: Vec<CatalogEntry> = entries
            .iter()
            .filter(|e| provider_id.is_none_or(|p| e.provider_id == p))
            .filter(|e| {
                e.sku.to_lowercase().contains(&needle)
                    || e.customs_description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.use_count.cmp(&a.use_count));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn catalog_lookup(
        &self,
        provider_id: &str,
        skus: &[String],
    ) -> Result<Vec<CatalogEntry>> {
        let entries = self.catalog.read().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.provider_id == provider_id && skus.contains(&e.sku))
            .cloned()
            .collect())
    }

    async fn bump_catalog_usage(&self, entry_ids: &[i64]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut entries = self.catalog.write().unwrap();
        for entry in entries.iter_mut() {
            if entry_ids.contains(&entry.id) {
                entry.use_count += 1;
                entry.last_used_at = now;
            }
        }
        Ok(())
    }
}
