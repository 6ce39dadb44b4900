//! Core data models for the extraction and classification pipeline.
//!
//! These types represent the line items, headers, and search results that
//! flow from document extraction through layered search to the final
//! confidence-labelled classification.

use serde::{Deserialize, Deserializer, Serialize};

/// Media kind of an uploaded document, declared by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// A plain raster image (photo or scan of a single invoice).
    Image { mime: String },
    /// A paginated PDF document.
    Pdf,
}

impl MediaKind {
    /// Guess the media kind from a file extension. Unknown extensions are
    /// treated as images so the vision model still gets a chance.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => MediaKind::Pdf,
            "png" => MediaKind::Image {
                mime: "image/png".to_string(),
            },
            "webp" => MediaKind::Image {
                mime: "image/webp".to_string(),
            },
            _ => MediaKind::Image {
                mime: "image/jpeg".to_string(),
            },
        }
    }
}

/// One line item extracted verbatim from a document.
///
/// Produced by the extractor, immutable afterwards; ownership passes to the
/// classification orchestrator. Numeric fields tolerate currency-formatted
/// strings in the model output (`"1.234,56"`, `"$ 12.50"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, alias = "line", alias = "lineNumber")]
    pub line_number: i64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, alias = "description", alias = "originalDescription")]
    pub original_description: String,
    #[serde(default, alias = "suggestedCustomsDescription")]
    pub suggested_customs_description: Option<String>,
    #[serde(default, alias = "suggestedNcmCode", alias = "ncm_code")]
    pub suggested_ncm_code: Option<String>,
    #[serde(default, deserialize_with = "flexible_number")]
    pub quantity: f64,
    #[serde(default, alias = "unit", alias = "unitOfMeasure")]
    pub unit_of_measure: String,
    #[serde(default, deserialize_with = "flexible_number", alias = "unitPrice")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "flexible_number", alias = "totalPrice")]
    pub total_price: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default, alias = "countryOfOrigin", alias = "origin")]
    pub country_of_origin: Option<String>,
}

/// Invoice-level fields, extracted once per document from the first
/// page/batch. The date is kept raw and unnormalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentHeader {
    #[serde(default, alias = "providerName", alias = "supplier_name")]
    pub provider_name: Option<String>,
    #[serde(default, alias = "invoiceNumber")]
    pub invoice_number: Option<String>,
    #[serde(default, alias = "invoiceDate")]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Output of the extractor: header plus ordered line items.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedDocument {
    pub header: DocumentHeader,
    pub items: Vec<RawItem>,
    pub page_count: usize,
    pub encrypted: bool,
}

/// A learned provider-specific SKU mapping, built from confirmed past
/// classifications. Keyed by `(provider_id, sku)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub provider_id: String,
    pub sku: String,
    pub customs_description: String,
    pub ncm_code: String,
    pub use_count: i64,
    pub last_used_at: i64,
}

/// One row of the nomenclature table, read-only from the pipeline's
/// perspective. The embedding is stored as a little-endian f32 BLOB.
#[derive(Debug, Clone)]
pub struct NomenclatureEntry {
    pub ncm_code: String,
    pub description: String,
    pub section: String,
    pub chapter: String,
    pub embedding: Option<Vec<f32>>,
}

/// Which search strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Catalog,
    Fulltext,
    Trigram,
    Semantic,
    Exact,
}

impl MatchType {
    /// Display label used in result listings.
    pub fn label(&self) -> &'static str {
        match self {
            MatchType::Catalog => "learned catalog",
            MatchType::Fulltext => "full-text search",
            MatchType::Trigram => "fuzzy search",
            MatchType::Semantic => "semantic search",
            MatchType::Exact => "exact code",
        }
    }
}

/// A single ranked result from one search layer. Ephemeral, per query.
///
/// `similarity` is always normalized into `[0, 1]` by the producing layer
/// before fusion.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub ncm_code: String,
    pub description: String,
    pub section: String,
    pub chapter: String,
    pub similarity: f64,
    pub match_type: MatchType,
    pub source: String,
}

/// Ordinal reliability feedback on a classification. Not a calibrated
/// probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Provenance of a chosen code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    ExactMatch,
    Semantic,
    LlmRag,
    Manual,
}

/// Terminal output of the pipeline: one per [`RawItem`], aligned by index
/// and preserving `line_number`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub line_number: i64,
    pub ncm_code: Option<String>,
    pub customs_description: Option<String>,
    pub confidence: Confidence,
    pub source: ClassificationSource,
}

/// Deserialize a numeric field that may arrive as a JSON number or as a
/// currency-formatted string.
fn flexible_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
        Null,
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => Ok(parse_amount(&s).unwrap_or(0.0)),
        NumberOrString::Null => Ok(0.0),
    }
}

/// Parse an amount string, stripping currency symbols and thousands
/// separators. Handles both `1,234.56` and `1.234,56` conventions.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            // The rightmost of the two is the decimal separator.
            if d > c {
                cleaned.replace(',', "")
            } else {
                cleaned.replace('.', "").replace(',', ".")
            }
        }
        (None, Some(c)) => {
            // A lone comma is decimal when followed by at most two digits.
            if cleaned.len() - c - 1 <= 2 && cleaned.matches(',').count() == 1 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        _ => cleaned,
    };

    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_plain() {
        assert_eq!(parse_amount("12.50"), Some(12.5));
        assert_eq!(parse_amount("1200"), Some(1200.0));
    }

    #[test]
    fn parse_amount_currency_symbols() {
        assert_eq!(parse_amount("$ 12.50"), Some(12.5));
        assert_eq!(parse_amount("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("USD 1,234.56"), Some(1234.56));
    }

    #[test]
    fn parse_amount_comma_decimal() {
        assert_eq!(parse_amount("99,9"), Some(99.9));
        assert_eq!(parse_amount("1,234"), Some(1234.0));
    }

    #[test]
    fn parse_amount_garbage() {
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn raw_item_tolerates_string_numbers() {
        let json = r#"{
            "line_number": 1,
            "original_description": "steel bolts",
            "quantity": "10",
            "unit_of_measure": "BOX",
            "unit_price": "$ 4.50",
            "total_price": "45.00",
            "currency": "USD"
        }"#;
        let item: RawItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.quantity, 10.0);
        assert_eq!(item.unit_price, 4.5);
        assert_eq!(item.total_price, 45.0);
        assert!(item.sku.is_none());
    }

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }
}
