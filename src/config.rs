use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub vision: VisionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Vision/LLM API used for extraction and query expansion.
#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Extractor and batch-executor tuning.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Documents with at most this many pages go to the model in one call.
    pub single_call_page_limit: usize,
    /// Pre-merge line numbers for page `i` start at `i * stride + 1`.
    pub page_start_stride: i64,
    /// Self-throttling delay between sequential per-page calls.
    pub page_delay_secs: u64,
    /// Concurrent group size for batched API calls.
    pub batch_size: usize,
    /// Sleep between batched groups.
    pub batch_delay_secs: u64,
    /// Attempts per call before a throttle is propagated.
    pub max_attempts: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            single_call_page_limit: 5,
            page_start_stride: 100,
            page_delay_secs: 30,
            batch_size: 3,
            batch_delay_secs: 2,
            max_attempts: 5,
        }
    }
}

impl ExtractionConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs(self.page_delay_secs)
    }
}

/// Thresholds and source bonuses for the layered search engine, kept in
/// one structure so tuning stays auditable.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum cosine similarity for semantic candidates.
    pub semantic_threshold: f64,
    /// Keep only semantic results within this window of the top result.
    pub semantic_cluster_window: f64,
    /// Cap on semantic results after cluster filtering.
    pub semantic_max_results: usize,
    /// Minimum trigram similarity; lower matches are dropped at source.
    pub trigram_min_similarity: f64,
    /// Full-text similarities are mapped into `[fulltext_floor, 1.0]`.
    pub fulltext_floor: f64,
    /// Candidates fetched per layer before fusion.
    pub candidate_limit: i64,
    /// Maximum fused results returned.
    pub final_limit: usize,
    /// Source bonuses encode the trust ordering
    /// catalog > fulltext > semantic > trigram.
    pub catalog_bonus: f64,
    pub fulltext_bonus: f64,
    pub semantic_bonus: f64,
    pub trigram_bonus: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.30,
            semantic_cluster_window: 0.02,
            semantic_max_results: 5,
            trigram_min_similarity: 0.40,
            fulltext_floor: 0.85,
            candidate_limit: 20,
            final_limit: 10,
            catalog_bonus: 0.10,
            fulltext_bonus: 0.03,
            semantic_bonus: 0.01,
            trigram_bonus: 0.00,
        }
    }
}

/// Decision-rule cut points for the classification orchestrator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Fused similarity at or above this is high confidence.
    pub high_confidence: f64,
    /// Fused similarity at or above this adopts the search result.
    pub adopt_threshold: f64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.85,
            adopt_threshold: 0.65,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.vision.model.trim().is_empty() {
        anyhow::bail!("vision.model must be set");
    }

    if config.extraction.batch_size == 0 {
        anyhow::bail!("extraction.batch_size must be >= 1");
    }

    if config.search.final_limit < 1 {
        anyhow::bail!("search.final_limit must be >= 1");
    }

    for (name, value) in [
        ("search.semantic_threshold", config.search.semantic_threshold),
        (
            "search.trigram_min_similarity",
            config.search.trigram_min_similarity,
        ),
        ("search.fulltext_floor", config.search.fulltext_floor),
        ("classify.high_confidence", config.classify.high_confidence),
        ("classify.adopt_threshold", config.classify.adopt_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
