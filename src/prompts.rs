//! Instruction prompts sent to the vision/LLM API.
//!
//! Kept in one place so the expected JSON shapes stay in sync with the
//! deserializers in [`crate::models`] and the repair layer.

/// Header extraction: invoice-level fields only, as a single JSON object.
pub const HEADER_PROMPT: &str = "\
You are reading a commercial invoice. Extract ONLY the invoice-level fields \
and answer with a single JSON object, no prose, no Markdown:\n\
{\"provider_name\": string|null, \"invoice_number\": string|null, \
\"invoice_date\": string|null, \"currency\": string|null}\n\
Keep the invoice date exactly as printed. Use the ISO currency code when \
recognizable.";

/// Line-item extraction, numbering from `start_line`.
pub fn items_prompt(start_line: i64) -> String {
    format!(
        "You are reading a commercial invoice. Extract EVERY product line item \
visible and answer with a single JSON object, no prose, no Markdown:\n\
{{\"items\": [{{\"line_number\": int, \"sku\": string|null, \
\"original_description\": string, \"suggested_customs_description\": string|null, \
\"suggested_ncm_code\": string|null, \"quantity\": number, \
\"unit_of_measure\": string, \"unit_price\": number, \"total_price\": number, \
\"currency\": string, \"country_of_origin\": string|null}}]}}\n\
Number the items sequentially starting at {start_line}. Copy descriptions \
verbatim. Strip currency symbols from numeric fields. If you can infer a \
plausible customs nomenclature code, put it in suggested_ncm_code; otherwise \
use null. If the page has no line items, answer {{\"items\": []}}."
    )
}

/// Single-description query expansion.
pub fn expand_prompt(description: &str) -> String {
    format!(
        "Rewrite this commercial product description in the technical phrasing \
used by customs nomenclature entries. Answer with the rewritten phrase only, \
at most 12 words, without inventing attributes that are not present:\n\
{description}"
    )
}

/// Batch query expansion: one numbered input list, one numbered answer list.
pub fn expand_batch_prompt(descriptions: &[String]) -> String {
    let mut numbered = String::new();
    for (i, d) in descriptions.iter().enumerate() {
        numbered.push_str(&format!("{}. {}\n", i + 1, d));
    }
    format!(
        "Rewrite each commercial product description below in the technical \
phrasing used by customs nomenclature entries. Answer with a numbered list in \
the same order, one line per item, formatted exactly as \"<n>. <phrase>\". At \
most 12 words per phrase, without inventing attributes that are not present.\n\
{numbered}"
    )
}
