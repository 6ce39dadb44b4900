//! Repair of malformed structured output from the vision/LLM layer.
//!
//! The upstream model is asked for JSON but is not guaranteed to produce
//! it: output-length limits truncate arrays mid-element, and responses are
//! often wrapped in Markdown code fences. This module recovers most of
//! those failures with pure string processing and never raises: callers
//! always get either a parsed value or the documented empty fallback.

use serde_json::Value;
use tracing::warn;

use crate::models::{DocumentHeader, RawItem};

/// Parse a text blob expected to contain JSON, repairing truncation if the
/// direct parse fails. Returns `None` only when the text is unrecoverable.
///
/// Already-valid JSON passes through the direct-parse path untouched, so
/// the function is idempotent over its own output.
pub fn repair_json(text: &str) -> Option<Value> {
    let body = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    let closed = close_truncated_json(body);
    serde_json::from_str(&closed).ok()
}

/// Parse a repaired response into line items.
///
/// Accepts either a bare JSON array or an `{"items": [...]}` object.
/// Elements that fail to deserialize are skipped; total failure yields an
/// empty list, never an error.
pub fn parse_items(text: &str) -> Vec<RawItem> {
    let Some(value) = repair_json(text) else {
        warn!("unrecoverable item response, returning no items");
        return Vec::new();
    };

    let array = match value {
        Value::Array(a) => a,
        Value::Object(mut o) => match o.remove("items") {
            Some(Value::Array(a)) => a,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    array
        .into_iter()
        .filter_map(|element| match serde_json::from_value::<RawItem>(element) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("skipping malformed line item: {e}");
                None
            }
        })
        .collect()
}

/// Parse a repaired response into a document header.
///
/// Accepts a bare object or `{"header": {...}}`. Total failure yields the
/// default (empty) header, never an error.
pub fn parse_header(text: &str) -> DocumentHeader {
    let Some(value) = repair_json(text) else {
        warn!("unrecoverable header response, returning empty header");
        return DocumentHeader::default();
    };

    let candidate = match &value {
        Value::Object(o) if o.contains_key("header") => value["header"].clone(),
        _ => value,
    };

    serde_json::from_value(candidate).unwrap_or_default()
}

/// Strip a Markdown code-fence wrapper (```` ```json ... ``` ````) if the
/// text carries one. Partial fences (truncated output) are tolerated.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line after the opening fence.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or_else(|| body.trim())
}

/// Close a JSON blob truncated by an output-length limit.
///
/// In order: balance an odd number of unescaped quotes, complete a
/// dangling `"key":` with `null`, then scan (respecting string state) for
/// unmatched `{`/`[`, strip one trailing comma, and append the missing
/// closers innermost-first.
fn close_truncated_json(text: &str) -> String {
    let mut out = text.trim().to_string();

    if count_unescaped_quotes(&out) % 2 == 1 {
        out.push('"');
    }

    if out.trim_end().ends_with(':') {
        out.push_str(" null");
    }

    let mut open_stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in out.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => open_stack.push(ch),
            '}' if !in_string => {
                if open_stack.last() == Some(&'{') {
                    open_stack.pop();
                }
            }
            ']' if !in_string => {
                if open_stack.last() == Some(&'[') {
                    open_stack.pop();
                }
            }
            _ => {}
        }
    }

    if !open_stack.is_empty() {
        let mut trimmed = out.trim_end().to_string();
        if trimmed.ends_with(',') {
            trimmed.pop();
        }
        out = trimmed;
        for open in open_stack.iter().rev() {
            out.push(if *open == '{' { '}' } else { ']' });
        }
    }

    out
}

fn count_unescaped_quotes(text: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_passes_through() {
        let v = repair_json(r#"[{"a": 1}]"#).unwrap();
        assert_eq!(v[0]["a"], 1);
    }

    #[test]
    fn strips_fences() {
        let v = repair_json("```json\n[1, 2, 3]\n```").unwrap();
        assert_eq!(v, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn closes_truncated_array() {
        let v = repair_json(r#"[{"a": 1}, {"a": 2"#).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
    }

    #[test]
    fn closes_truncated_string() {
        let v = repair_json(r#"[{"description": "stainless ste"#).unwrap();
        assert_eq!(v[0]["description"], "stainless ste");
    }

    #[test]
    fn completes_dangling_key() {
        let v = repair_json(r#"{"items": [{"sku": "X1", "quantity":"#).unwrap();
        assert!(v["items"][0]["quantity"].is_null());
    }

    #[test]
    fn strips_trailing_comma() {
        let v = repair_json(r#"[{"a": 1},"#).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
    }

    #[test]
    fn unrecoverable_is_none() {
        assert!(repair_json("not json at all").is_none());
        assert!(repair_json("").is_none());
    }

    #[test]
    fn repair_is_idempotent() {
        let cases = [
            r#"[{"a": 1}, {"a": 2"#,
            "```json\n{\"items\": []}\n```",
            r#"{"key":"#,
        ];
        for case in cases {
            let once = repair_json(case).unwrap();
            let again = repair_json(&serde_json::to_string(&once).unwrap()).unwrap();
            assert_eq!(once, again, "repair changed already-valid output: {case}");
        }
    }

    #[test]
    fn parse_items_bare_array_and_wrapper() {
        let bare = r#"[{"line_number": 1, "original_description": "bolts"}]"#;
        assert_eq!(parse_items(bare).len(), 1);

        let wrapped = r#"{"items": [{"line_number": 1, "original_description": "bolts"}]}"#;
        assert_eq!(parse_items(wrapped).len(), 1);
    }

    #[test]
    fn parse_items_total_failure_is_empty() {
        assert!(parse_items("the invoice has no items").is_empty());
        assert!(parse_items(r#"{"unexpected": true}"#).is_empty());
    }

    #[test]
    fn parse_header_fallback_is_default() {
        let header = parse_header("garbage");
        assert!(header.provider_name.is_none());
        assert!(header.invoice_number.is_none());
    }

    #[test]
    fn parse_header_wrapped() {
        let header = parse_header(r#"{"header": {"provider_name": "ACME", "currency": "USD"}}"#);
        assert_eq!(header.provider_name.as_deref(), Some("ACME"));
        assert_eq!(header.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn truncated_items_recover_partially() {
        // Truncated mid-way through the second element: the quote and both
        // brackets get closed, and the partial element still deserializes
        // because every field is defaulted.
        let text = r#"{"items": [
            {"line_number": 1, "original_description": "copper wire", "quantity": 5},
            {"line_number": 2, "original_description": "alumi"#;
        let items = parse_items(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].original_description, "alumi");
    }
}
