//! Multi-layer nomenclature search with score normalization and fusion.
//!
//! Four independent strategies run over a [`NomenclatureStore`] (learned
//! catalog, stemmed full text, character trigrams, and semantic vectors),
//! each normalizing its scores into `[0, 1]`. [`combine_results`] fuses
//! the ranked sets into one decision list using per-layer minimum scores
//! and fixed source bonuses that encode the trust ordering
//! catalog > fulltext > semantic > trigram.
//!
//! A query that already looks like a nomenclature code bypasses every
//! layer and resolves by code prefix.

use std::collections::HashMap;

use anyhow::Result;

use crate::config::SearchConfig;
use crate::models::{MatchType, SearchResult};
use crate::store::{NomenclatureHit, NomenclatureStore};

/// True when the query is a bare or partial numeric nomenclature code
/// (digits and dots, at least two digits).
pub fn is_code_query(query: &str) -> bool {
    let trimmed = query.trim();
    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    digits >= 2
        && !trimmed.is_empty()
        && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Resolve a code-shaped query by prefix, bypassing all search layers.
pub async fn exact_code_search<S: NomenclatureStore>(
    store: &S,
    query: &str,
    limit: i64,
) -> Result<Vec<SearchResult>> {
    let hits = store.code_prefix_search(query.trim(), limit).await?;
    Ok(hits
        .into_iter()
        .map(|hit| to_result(hit, 1.0, MatchType::Exact))
        .collect())
}

/// Catalog layer: learned `(provider, sku)` mappings are ground truth, so
/// similarity is fixed at 1.0.
pub async fn catalog_layer<S: NomenclatureStore>(
    store: &S,
    provider_id: Option<&str>,
    query: &str,
    cfg: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    let entries = store
        .catalog_search(provider_id, query, cfg.candidate_limit)
        .await?;
    Ok(entries
        .into_iter()
        .map(|entry| SearchResult {
            ncm_code: entry.ncm_code,
            description: entry.customs_description,
            section: String::new(),
            chapter: String::new(),
            similarity: 1.0,
            match_type: MatchType::Catalog,
            source: MatchType::Catalog.label().to_string(),
        })
        .collect())
}

/// Full-text layer: searches both the raw and the expanded query, merges
/// by code keeping the better rank, and maps rank positions into
/// `[fulltext_floor, 1.0]`.
pub async fn fulltext_layer<S: NomenclatureStore>(
    store: &S,
    raw_query: &str,
    expanded_query: &str,
    cfg: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    let mut merged: Vec<NomenclatureHit> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    let mut runs = vec![raw_query];
    if expanded_query != raw_query && !expanded_query.trim().is_empty() {
        runs.push(expanded_query);
    }

    for query in runs {
        let hits = store.fulltext_search(query, cfg.candidate_limit).await?;
        for (rank, hit) in hits.into_iter().enumerate() {
            let similarity = rank_to_similarity(rank, cfg.candidate_limit as usize, cfg);
            match seen.get(&hit.ncm_code) {
                Some(&idx) => {
                    // Keep whichever run ranked the code higher.
                    if similarity > merged[idx].raw_score {
                        merged[idx].raw_score = similarity;
                    }
                }
                None => {
                    seen.insert(hit.ncm_code.clone(), merged.len());
                    merged.push(NomenclatureHit {
                        raw_score: similarity,
                        ..hit
                    });
                }
            }
        }
    }

    merged.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.ncm_code.cmp(&b.ncm_code))
    });

    Ok(merged
        .into_iter()
        .map(|hit| {
            let similarity = hit.raw_score;
            to_result(hit, similarity, MatchType::Fulltext)
        })
        .collect())
}

/// Trigram layer: the store discards matches below the minimum similarity.
pub async fn trigram_layer<S: NomenclatureStore>(
    store: &S,
    query: &str,
    cfg: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    let hits = store
        .trigram_search(query, cfg.trigram_min_similarity, cfg.candidate_limit)
        .await?;
    Ok(hits
        .into_iter()
        .map(|hit| {
            let similarity = hit.raw_score.clamp(0.0, 1.0);
            to_result(hit, similarity, MatchType::Trigram)
        })
        .collect())
}

/// Semantic layer: nearest neighbors of the expanded query's embedding.
///
/// When the model is uncertain the neighbor list degrades into a long
/// tail of near-irrelevant codes; the cluster filter keeps only results
/// within `semantic_cluster_window` of the top one, capped at
/// `semantic_max_results`.
pub async fn semantic_layer<S: NomenclatureStore>(
    store: &S,
    query_vec: &[f32],
    cfg: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    if query_vec.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = store
        .vector_search(query_vec, cfg.semantic_threshold, cfg.candidate_limit)
        .await?;

    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if hits.len() >= 2 {
        let top = hits[0].raw_score;
        hits.retain(|h| top - h.raw_score <= cfg.semantic_cluster_window);
    }
    hits.truncate(cfg.semantic_max_results);

    Ok(hits
        .into_iter()
        .map(|hit| {
            let similarity = hit.raw_score.clamp(0.0, 1.0);
            to_result(hit, similarity, MatchType::Semantic)
        })
        .collect())
}

/// Fuse the ranked result sets of independent layers into one decision
/// list.
///
/// Per-layer minimum scores drop weak matches, the source bonus breaks
/// ties when several layers surface the same code, duplicates keep the
/// higher effective score, and the output is sorted by effective score
/// (ties by code, so the result is deterministic and independent of the
/// layer ordering).
pub fn combine_results(
    layers: Vec<Vec<SearchResult>>,
    cfg: &SearchConfig,
    limit: usize,
) -> Vec<SearchResult> {
    let mut best: HashMap<String, (f64, SearchResult)> = HashMap::new();

    for layer in layers {
        for result in layer {
            if result.similarity < layer_min_score(result.match_type, cfg) {
                continue;
            }
            let effective = result.similarity + source_bonus(result.match_type, cfg);
            let replace = match best.get(&result.ncm_code) {
                None => true,
                Some((current, kept)) => {
                    // Equal effective scores fall back to the trust
                    // ordering so the outcome never depends on which
                    // layer was visited first.
                    effective > *current
                        || (effective == *current
                            && source_bonus(result.match_type, cfg)
                                > source_bonus(kept.match_type, cfg))
                }
            };
            if replace {
                best.insert(result.ncm_code.clone(), (effective, result));
            }
        }
    }

    let mut fused: Vec<(f64, SearchResult)> = best.into_values().collect();
    fused.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.ncm_code.cmp(&b.1.ncm_code))
    });
    fused.truncate(limit);
    fused.into_iter().map(|(_, result)| result).collect()
}

/// Minimum similarity a layer's results must reach to take part in
/// fusion.
fn layer_min_score(match_type: MatchType, cfg: &SearchConfig) -> f64 {
    match match_type {
        MatchType::Catalog | MatchType::Fulltext | MatchType::Exact => 0.0,
        MatchType::Trigram => cfg.trigram_min_similarity,
        MatchType::Semantic => cfg.semantic_threshold,
    }
}

/// Fixed bonus added to a layer's similarity before deduplication.
fn source_bonus(match_type: MatchType, cfg: &SearchConfig) -> f64 {
    match match_type {
        MatchType::Catalog => cfg.catalog_bonus,
        MatchType::Fulltext => cfg.fulltext_bonus,
        MatchType::Semantic => cfg.semantic_bonus,
        MatchType::Trigram => cfg.trigram_bonus,
        MatchType::Exact => 0.0,
    }
}

/// Map a 0-based rank position into `[fulltext_floor, 1.0]`.
fn rank_to_similarity(rank: usize, of: usize, cfg: &SearchConfig) -> f64 {
    if of <= 1 {
        return 1.0;
    }
    let span = 1.0 - cfg.fulltext_floor;
    1.0 - (rank.min(of - 1) as f64 / (of - 1) as f64) * span
}

fn to_result(hit: NomenclatureHit, similarity: f64, match_type: MatchType) -> SearchResult {
    SearchResult {
        ncm_code: hit.ncm_code,
        description: hit.description,
        section: hit.section,
        chapter: hit.chapter,
        similarity,
        match_type,
        source: match_type.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NomenclatureEntry;
    use crate::store::memory::MemoryStore;

    fn result(code: &str, similarity: f64, match_type: MatchType) -> SearchResult {
        SearchResult {
            ncm_code: code.to_string(),
            description: format!("entry {code}"),
            section: "XVI".to_string(),
            chapter: "84".to_string(),
            similarity,
            match_type,
            source: match_type.label().to_string(),
        }
    }

    fn entry(code: &str, description: &str) -> NomenclatureEntry {
        NomenclatureEntry {
            ncm_code: code.to_string(),
            description: description.to_string(),
            section: "XVI".to_string(),
            chapter: "84".to_string(),
            embedding: None,
        }
    }

    #[test]
    fn code_query_detection() {
        assert!(is_code_query("8471"));
        assert!(is_code_query("8471.30"));
        assert!(is_code_query(" 8471.30.12 "));
        assert!(!is_code_query("laptop computer"));
        assert!(!is_code_query("8a71"));
        assert!(!is_code_query("."));
        assert!(!is_code_query(""));
    }

    #[tokio::test]
    async fn exact_code_bypasses_layers() {
        let store = MemoryStore::new();
        store.add_nomenclature(entry("8471.30.12", "portable digital machines"));
        store.add_nomenclature(entry("8471.41.10", "digital processing units"));
        store.add_nomenclature(entry("9001.10.11", "optical fibres"));

        let results = exact_code_search(&store, "8471", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(r.ncm_code.starts_with("8471"));
            assert_eq!(r.similarity, 1.0);
            assert_eq!(r.match_type, MatchType::Exact);
        }
        assert_eq!(store.layer_calls(), 0, "search layers must not run");
    }

    #[test]
    fn fusion_is_deterministic_and_order_independent() {
        let cfg = SearchConfig::default();
        let a = vec![
            result("8471.30.12", 0.92, MatchType::Fulltext),
            result("8471.41.10", 0.88, MatchType::Fulltext),
        ];
        let b = vec![
            result("8471.30.12", 0.90, MatchType::Semantic),
            result("8473.30.99", 0.55, MatchType::Semantic),
        ];
        let c = vec![result("8471.41.10", 0.61, MatchType::Trigram)];

        let forward = combine_results(vec![a.clone(), b.clone(), c.clone()], &cfg, 10);
        let reversed = combine_results(vec![c, b, a], &cfg, 10);

        let forward_codes: Vec<&str> = forward.iter().map(|r| r.ncm_code.as_str()).collect();
        let reversed_codes: Vec<&str> = reversed.iter().map(|r| r.ncm_code.as_str()).collect();
        assert_eq!(forward_codes, reversed_codes);
        assert_eq!(forward.len(), reversed.len());
    }

    #[test]
    fn fusion_catalog_beats_semantic_for_same_code() {
        let cfg = SearchConfig::default();
        let catalog = vec![result("8471.30.12", 1.0, MatchType::Catalog)];
        let semantic = vec![result("8471.30.12", 1.0, MatchType::Semantic)];

        let fused = combine_results(vec![semantic, catalog], &cfg, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].match_type, MatchType::Catalog);
    }

    #[test]
    fn fusion_filters_per_layer_minimums() {
        let cfg = SearchConfig::default();
        let layers = vec![
            vec![result("1111.11.11", 0.35, MatchType::Trigram)], // below 0.40
            vec![result("2222.22.22", 0.25, MatchType::Semantic)], // below 0.30
            vec![result("3333.33.33", 0.10, MatchType::Fulltext)], // no minimum
        ];
        let fused = combine_results(layers, &cfg, 10);
        let codes: Vec<&str> = fused.iter().map(|r| r.ncm_code.as_str()).collect();
        assert_eq!(codes, vec!["3333.33.33"]);
    }

    #[test]
    fn fusion_truncates_to_limit() {
        let cfg = SearchConfig::default();
        let layer: Vec<SearchResult> = (0..8)
            .map(|i| result(&format!("84{:02}.00.00", i), 0.9 - i as f64 * 0.01, MatchType::Fulltext))
            .collect();
        let fused = combine_results(vec![layer], &cfg, 3);
        assert_eq!(fused.len(), 3);
        assert!(fused[0].similarity >= fused[1].similarity);
    }

    #[test]
    fn rank_mapping_spans_floor_to_one() {
        let cfg = SearchConfig::default();
        let top = rank_to_similarity(0, 20, &cfg);
        let bottom = rank_to_similarity(19, 20, &cfg);
        assert!((top - 1.0).abs() < 1e-9);
        assert!((bottom - cfg.fulltext_floor).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fulltext_layer_merges_raw_and_expanded_runs() {
        let store = MemoryStore::new();
        store.add_nomenclature(entry("8544.42.00", "insulated electric conductors fitted with connectors"));
        store.add_nomenclature(entry("7408.11.00", "refined copper wire"));

        let cfg = SearchConfig::default();
        let results = fulltext_layer(&store, "copper cable", "insulated copper conductors", &cfg)
            .await
            .unwrap();

        // Both runs contribute; each code appears once.
        let codes: Vec<&str> = results.iter().map(|r| r.ncm_code.as_str()).collect();
        assert!(codes.contains(&"7408.11.00"));
        assert!(codes.contains(&"8544.42.00"));
        assert_eq!(codes.len(), 2);
        for r in &results {
            assert!(r.similarity >= cfg.fulltext_floor && r.similarity <= 1.0);
        }
    }

    #[tokio::test]
    async fn semantic_layer_cluster_filter() {
        let store = MemoryStore::new();
        let mut near1 = entry("8471.30.12", "portable computers");
        near1.embedding = Some(vec![1.0, 0.0]);
        let mut near2 = entry("8471.41.10", "computer processing units");
        near2.embedding = Some(vec![0.999, 0.045]);
        let mut far = entry("8473.30.99", "computer parts");
        far.embedding = Some(vec![0.80, 0.60]);
        store.add_nomenclature(near1);
        store.add_nomenclature(near2);
        store.add_nomenclature(far);

        let cfg = SearchConfig::default();
        let results = semantic_layer(&store, &[1.0, 0.0], &cfg).await.unwrap();

        // The far result is above the absolute threshold but outside the
        // 0.02 cluster window around the top result.
        let codes: Vec<&str> = results.iter().map(|r| r.ncm_code.as_str()).collect();
        assert!(codes.contains(&"8471.30.12"));
        assert!(codes.contains(&"8471.41.10"));
        assert!(!codes.contains(&"8473.30.99"));
    }

    #[tokio::test]
    async fn semantic_layer_caps_results() {
        let store = MemoryStore::new();
        for i in 0..8 {
            let mut e = entry(&format!("84{:02}.00.00", i), "widget");
            e.embedding = Some(vec![1.0, 0.0]);
            store.add_nomenclature(e);
        }

        let cfg = SearchConfig::default();
        let results = semantic_layer(&store, &[1.0, 0.0], &cfg).await.unwrap();
        assert_eq!(results.len(), cfg.semantic_max_results);
    }
}
