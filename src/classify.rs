//! Per-invoice classification orchestration.
//!
//! A single pass with terminal states only; each item resolves exactly
//! once per invocation:
//!
//! 1. catalog shortcut for known `(provider, sku)` pairs;
//! 2. one batched query expansion for everything unresolved;
//! 3. one batched embedding call for the expanded texts;
//! 4. per-item layered search (full text + trigram + semantic) and fusion;
//! 5. the confidence decision rule.
//!
//! Expansion and embedding failures degrade gracefully (originals are
//! kept, the semantic layer contributes nothing). The catalog usage
//! counter is bumped by a detached task that never blocks the result
//! path.

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::{ClassifyConfig, SearchConfig};
use crate::embedding::EmbeddingApi;
use crate::expand::Expander;
use crate::models::{
    ClassificationResult, ClassificationSource, Confidence, RawItem, SearchResult,
};
use crate::search::{combine_results, fulltext_layer, semantic_layer, trigram_layer};
use crate::store::NomenclatureStore;
use crate::vision::VisionModel;

/// Classifies extracted line items against the nomenclature store.
pub struct Classifier<V, E, S>
where
    V: VisionModel,
    E: EmbeddingApi,
    S: NomenclatureStore + 'static,
{
    expander: Expander<V>,
    embedding: E,
    store: Arc<S>,
    search: SearchConfig,
    config: ClassifyConfig,
}

impl<V, E, S> Classifier<V, E, S>
where
    V: VisionModel,
    E: EmbeddingApi,
    S: NomenclatureStore + 'static,
{
    pub fn new(
        expander: Expander<V>,
        embedding: E,
        store: Arc<S>,
        search: SearchConfig,
        config: ClassifyConfig,
    ) -> Self {
        Self {
            expander,
            embedding,
            store,
            search,
            config,
        }
    }

    /// Classify every item, returning results aligned index-for-index
    /// with the input.
    pub async fn classify(
        &self,
        items: &[RawItem],
        provider_id: Option<&str>,
    ) -> Result<Vec<ClassificationResult>> {
        let mut results: Vec<Option<ClassificationResult>> = vec![None; items.len()];

        // Step 1: catalog shortcut for items with a sku and a known provider.
        if let Some(provider) = provider_id {
            self.resolve_from_catalog(items, provider, &mut results)
                .await?;
        }

        let unresolved: Vec<usize> = (0..items.len()).filter(|i| results[*i].is_none()).collect();
        if unresolved.is_empty() {
            return Ok(finalize(results, items));
        }
        debug!(
            "{} of {} items unresolved after catalog shortcut",
            unresolved.len(),
            items.len()
        );

        // Step 2: one expansion call for all unresolved descriptions.
        let descriptions: Vec<String> = unresolved
            .iter()
            .map(|&i| items[i].original_description.clone())
            .collect();
        let expanded = self.expander.expand_batch(&descriptions).await;

        // Step 3: one embedding call for the expanded texts. Failure just
        // silences the semantic layer for this run.
        let embeddings = match self.embedding.embed(&expanded).await {
            Ok(vectors) if vectors.len() == expanded.len() => Some(vectors),
            Ok(vectors) => {
                warn!(
                    "embedding response length mismatch ({} of {}), skipping semantic layer",
                    vectors.len(),
                    expanded.len()
                );
                None
            }
            Err(e) => {
                warn!("embedding failed, skipping semantic layer: {e}");
                None
            }
        };

        // Step 4: layered search per item, in parallel; results are
        // written back by index so input ordering is preserved.
        let searches = unresolved.iter().enumerate().map(|(slot, &index)| {
            let item = &items[index];
            let expanded_query = &expanded[slot];
            let query_vec = embeddings
                .as_ref()
                .map(|vectors| vectors[slot].as_slice())
                .unwrap_or(&[]);
            async move {
                let fused = self.search_item(item, expanded_query, query_vec).await?;
                Ok::<(usize, Vec<SearchResult>), anyhow::Error>((index, fused))
            }
        });

        for outcome in join_all(searches).await {
            let (index, fused) = outcome?;
            results[index] = Some(decide(&items[index], &fused, &self.config));
        }

        Ok(finalize(results, items))
    }

    async fn resolve_from_catalog(
        &self,
        items: &[RawItem],
        provider: &str,
        results: &mut [Option<ClassificationResult>],
    ) -> Result<()> {
        let skus: Vec<String> = items.iter().filter_map(|i| i.sku.clone()).collect();
        if skus.is_empty() {
            return Ok(());
        }

        let entries = self.store.catalog_lookup(provider, &skus).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut used_ids = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let Some(sku) = &item.sku else { continue };
            let Some(entry) = entries.iter().find(|e| &e.sku == sku) else {
                continue;
            };
            results[index] = Some(ClassificationResult {
                line_number: item.line_number,
                ncm_code: Some(entry.ncm_code.clone()),
                customs_description: Some(entry.customs_description.clone()),
                confidence: Confidence::High,
                source: ClassificationSource::ExactMatch,
            });
            used_ids.push(entry.id);
        }

        if !used_ids.is_empty() {
            used_ids.sort_unstable();
            used_ids.dedup();
            // Advisory counter; detached so it never blocks the decision.
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                if let Err(e) = store.bump_catalog_usage(&used_ids).await {
                    warn!("catalog usage bump failed: {e}");
                }
            });
        }

        Ok(())
    }

    /// Full text + trigram concurrently, semantic from the precomputed
    /// embedding, fused without the catalog layer (already handled by the
    /// shortcut).
    async fn search_item(
        &self,
        item: &RawItem,
        expanded_query: &str,
        query_vec: &[f32],
    ) -> Result<Vec<SearchResult>> {
        let raw_query = item.original_description.as_str();

        let (fulltext, trigram) = futures::join!(
            fulltext_layer(self.store.as_ref(), raw_query, expanded_query, &self.search),
            trigram_layer(self.store.as_ref(), raw_query, &self.search),
        );

        let semantic = semantic_layer(self.store.as_ref(), query_vec, &self.search).await?;

        Ok(combine_results(
            vec![fulltext?, trigram?, semantic],
            &self.search,
            self.search.final_limit,
        ))
    }
}

/// Every input item yields exactly one result, aligned by index. A slot
/// left empty (which the orchestration above never does) still gets the
/// documented worst case rather than being dropped.
fn finalize(
    results: Vec<Option<ClassificationResult>>,
    items: &[RawItem],
) -> Vec<ClassificationResult> {
    results
        .into_iter()
        .zip(items)
        .map(|(result, item)| {
            result.unwrap_or_else(|| ClassificationResult {
                line_number: item.line_number,
                ncm_code: None,
                customs_description: None,
                confidence: Confidence::Low,
                source: ClassificationSource::LlmRag,
            })
        })
        .collect()
}

/// The per-item decision rule.
///
/// Adopt the top fused result when it is strong enough or when the model
/// offered no code of its own; otherwise keep the model's suggestion,
/// using the 4-digit chapter prefix as a weak confirmation signal. An
/// unconfirmed-but-uncontradicted suggestion is promoted to medium rather
/// than discarded.
fn decide(item: &RawItem, fused: &[SearchResult], cfg: &ClassifyConfig) -> ClassificationResult {
    let suggested = item
        .suggested_ncm_code
        .as_deref()
        .filter(|c| !c.trim().is_empty());

    let top = fused.first();

    if let Some(top) = top {
        if top.similarity >= cfg.adopt_threshold || suggested.is_none() {
            let confidence = if top.similarity >= cfg.high_confidence {
                Confidence::High
            } else if top.similarity >= cfg.adopt_threshold {
                Confidence::Medium
            } else {
                Confidence::Low
            };
            return ClassificationResult {
                line_number: item.line_number,
                ncm_code: Some(top.ncm_code.clone()),
                customs_description: Some(top.description.clone()),
                confidence,
                source: ClassificationSource::Semantic,
            };
        }
    }

    // The model suggested a code the search layers did not clearly beat.
    if let Some(code) = suggested {
        let chapter = code_prefix(code, 4);
        let confirmed = !chapter.is_empty()
            && fused
                .iter()
                .any(|r| code_prefix(&r.ncm_code, 4) == chapter);

        // Uncontradicted: no layer returned anything at all. A plausible
        // model guess is kept at medium rather than discarded outright.
        let confidence = if confirmed || fused.is_empty() {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        return ClassificationResult {
            line_number: item.line_number,
            ncm_code: Some(code.to_string()),
            customs_description: item.suggested_customs_description.clone(),
            confidence,
            source: ClassificationSource::LlmRag,
        };
    }

    // No search result and no suggestion: the documented worst case.
    ClassificationResult {
        line_number: item.line_number,
        ncm_code: None,
        customs_description: None,
        confidence: Confidence::Low,
        source: ClassificationSource::LlmRag,
    }
}

/// First `n` digits of a code, ignoring separators.
fn code_prefix(code: &str, n: usize) -> String {
    code.chars().filter(char::is_ascii_digit).take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchType;

    fn item(description: &str, suggested: Option<&str>) -> RawItem {
        serde_json::from_value(serde_json::json!({
            "line_number": 1,
            "original_description": description,
            "suggested_ncm_code": suggested,
            "suggested_customs_description": suggested.map(|_| "model description"),
        }))
        .unwrap()
    }

    fn fused(code: &str, similarity: f64) -> SearchResult {
        SearchResult {
            ncm_code: code.to_string(),
            description: format!("entry {code}"),
            section: "XVI".to_string(),
            chapter: "84".to_string(),
            similarity,
            match_type: MatchType::Fulltext,
            source: "full-text search".to_string(),
        }
    }

    #[test]
    fn strong_result_is_adopted_high() {
        let cfg = ClassifyConfig::default();
        let result = decide(
            &item("laptop", Some("9999.99.99")),
            &[fused("8471.30.12", 0.93)],
            &cfg,
        );
        assert_eq!(result.ncm_code.as_deref(), Some("8471.30.12"));
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.source, ClassificationSource::Semantic);
    }

    #[test]
    fn mid_result_is_adopted_medium() {
        let cfg = ClassifyConfig::default();
        let result = decide(&item("laptop", None), &[fused("8471.30.12", 0.72)], &cfg);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.source, ClassificationSource::Semantic);
    }

    #[test]
    fn weak_result_without_suggestion_is_adopted_low() {
        let cfg = ClassifyConfig::default();
        let result = decide(&item("widget", None), &[fused("8479.89.99", 0.41)], &cfg);
        assert_eq!(result.ncm_code.as_deref(), Some("8479.89.99"));
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn suggestion_confirmed_by_chapter_prefix_is_medium() {
        let cfg = ClassifyConfig::default();
        let result = decide(
            &item("laptop", Some("8471.41.90")),
            &[fused("8471.30.12", 0.50)],
            &cfg,
        );
        assert_eq!(result.ncm_code.as_deref(), Some("8471.41.90"));
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.source, ClassificationSource::LlmRag);
    }

    #[test]
    fn suggestion_contradicted_stays_low() {
        let cfg = ClassifyConfig::default();
        let result = decide(
            &item("widget", Some("9001.10.11")),
            &[fused("8471.30.12", 0.50)],
            &cfg,
        );
        assert_eq!(result.ncm_code.as_deref(), Some("9001.10.11"));
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn uncontradicted_suggestion_promoted_to_medium() {
        let cfg = ClassifyConfig::default();
        let result = decide(&item("widget", Some("9001.10.11")), &[], &cfg);
        assert_eq!(result.ncm_code.as_deref(), Some("9001.10.11"));
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.source, ClassificationSource::LlmRag);
    }

    #[test]
    fn nothing_at_all_is_the_documented_worst_case() {
        let cfg = ClassifyConfig::default();
        let result = decide(&item("mystery", None), &[], &cfg);
        assert!(result.ncm_code.is_none());
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.source, ClassificationSource::LlmRag);
    }

    #[test]
    fn code_prefix_ignores_separators() {
        assert_eq!(code_prefix("8471.30.12", 4), "8471");
        assert_eq!(code_prefix("84.71", 4), "8471");
        assert_eq!(code_prefix("84", 4), "84");
        assert_eq!(code_prefix("", 4), "");
    }
}
