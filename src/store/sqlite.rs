//! SQLite-backed [`NomenclatureStore`].
//!
//! Full-text search uses an FTS5 virtual table over nomenclature
//! descriptions. Trigram and vector channels fetch candidate rows and
//! score them in Rust; the nomenclature table is small enough (a few
//! thousand rows) that brute force beats maintaining extra indexes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{CatalogEntry, NomenclatureEntry};
use crate::trigram::trigram_similarity;

use super::{NomenclatureHit, NomenclatureStore};

/// Production store over a shared connection pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a nomenclature entry, its FTS row, and its
    /// embedding. Used by the (separate) ingestion process and by tests.
    pub async fn insert_nomenclature(&self, entry: &NomenclatureEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nomenclature (ncm_code, description, section, chapter)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(ncm_code) DO UPDATE SET
                description = excluded.description,
                section = excluded.section,
                chapter = excluded.chapter
            "#,
        )
        .bind(&entry.ncm_code)
        .bind(&entry.description)
        .bind(&entry.section)
        .bind(&entry.chapter)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM nomenclature_fts WHERE ncm_code = ?")
            .bind(&entry.ncm_code)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO nomenclature_fts (ncm_code, description) VALUES (?, ?)")
            .bind(&entry.ncm_code)
            .bind(&entry.description)
            .execute(&self.pool)
            .await?;

        if let Some(embedding) = &entry.embedding {
            sqlx::query(
                r#"
                INSERT INTO nomenclature_vectors (ncm_code, embedding, dims)
                VALUES (?, ?, ?)
                ON CONFLICT(ncm_code) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&entry.ncm_code)
            .bind(vec_to_blob(embedding))
            .bind(embedding.len() as i64)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Record a human-confirmed classification in the learned catalog.
    ///
    /// Upserts the `(provider, sku)` entry and counts the confirmation as
    /// a use.
    pub async fn confirm_classification(
        &self,
        provider_id: &str,
        sku: &str,
        customs_description: &str,
        ncm_code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_entries
                (provider_id, sku, customs_description, ncm_code, use_count, last_used_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(provider_id, sku) DO UPDATE SET
                customs_description = excluded.customs_description,
                ncm_code = excluded.ncm_code,
                use_count = catalog_entries.use_count + 1,
                last_used_at = excluded.last_used_at
            "#,
        )
        .bind(provider_id)
        .bind(sku)
        .bind(customs_description)
        .bind(ncm_code)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn hit_from_row(row: &sqlx::sqlite::SqliteRow, raw_score: f64) -> NomenclatureHit {
    NomenclatureHit {
        ncm_code: row.get("ncm_code"),
        description: row.get("description"),
        section: row.get("section"),
        chapter: row.get("chapter"),
        raw_score,
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> CatalogEntry {
    CatalogEntry {
        id: row.get("id"),
        provider_id: row.get("provider_id"),
        sku: row.get("sku"),
        customs_description: row.get("customs_description"),
        ncm_code: row.get("ncm_code"),
        use_count: row.get("use_count"),
        last_used_at: row.get("last_used_at"),
    }
}

/// Build an FTS5 MATCH expression from free text: quoted terms OR-ed
/// together, so user input never hits the FTS query parser raw.
fn fts_match_expr(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl NomenclatureStore for SqliteStore {
    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<NomenclatureHit>> {
        let expr = fts_match_expr(query);
        if expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT n.ncm_code, n.description, n.section, n.chapter, nomenclature_fts.rank
            FROM nomenclature_fts
            JOIN nomenclature n ON n.ncm_code = nomenclature_fts.ncm_code
            WHERE nomenclature_fts MATCH ?
            ORDER BY nomenclature_fts.rank
            LIMIT ?
            "#,
        )
        .bind(expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                // Negate so higher = better.
                hit_from_row(row, -rank)
            })
            .collect())
    }

    async fn trigram_search(
        &self,
        query: &str,
        min_similarity: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>> {
        // Fetch all rows and score in Rust.
        let rows = sqlx::query("SELECT ncm_code, description, section, chapter FROM nomenclature")
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<NomenclatureHit> = rows
            .iter()
            .filter_map(|row| {
                let description: String = row.get("description");
                let sim = trigram_similarity(query, &description);
                (sim >= min_similarity).then(|| hit_from_row(row, sim))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<NomenclatureHit>> {
        let rows = sqlx::query(
            r#"
            SELECT v.ncm_code, v.embedding, n.description, n.section, n.chapter
            FROM nomenclature_vectors v
            JOIN nomenclature n ON n.ncm_code = v.ncm_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<NomenclatureHit> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let sim = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                (sim >= threshold).then(|| hit_from_row(row, sim))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn code_prefix_search(&self, prefix: &str, limit: i64) -> Result<Vec<NomenclatureHit>> {
        let rows = sqlx::query(
            r#"
            SELECT ncm_code, description, section, chapter
            FROM nomenclature
            WHERE ncm_code LIKE ? || '%'
            ORDER BY ncm_code
            LIMIT ?
            "#,
        )
        .bind(prefix)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| hit_from_row(row, 1.0)).collect())
    }

    async fn catalog_search(
        &self,
        provider_id: Option<&str>,
        query: &str,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider_id, sku, customs_description, ncm_code, use_count, last_used_at
            FROM catalog_entries
            WHERE (? IS NULL OR provider_id = ?)
              AND (sku LIKE '%' || ? || '%' OR customs_description LIKE '%' || ? || '%')
            ORDER BY use_count DESC, last_used_at DESC
            LIMIT ?
            "#,
        )
        .bind(provider_id)
        .bind(provider_id)
        .bind(query)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn catalog_lookup(
        &self,
        provider_id: &str,
        skus: &[String],
    ) -> Result<Vec<CatalogEntry>> {
        if skus.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; skus.len()].join(", ");
        let sql = format!(
            "SELECT id, provider_id, sku, customs_description, ncm_code, use_count, last_used_at \
             FROM catalog_entries WHERE provider_id = ? AND sku IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(provider_id);
        for sku in skus {
            query = query.bind(sku);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn bump_catalog_usage(&self, entry_ids: &[i64]) -> Result<()> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; entry_ids.len()].join(", ");
        let sql = format!(
            "UPDATE catalog_entries \
             SET use_count = use_count + 1, last_used_at = ? \
             WHERE id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(Utc::now().timestamp());
        for id in entry_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}
