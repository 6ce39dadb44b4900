//! Query expansion: colloquial product descriptions rewritten into
//! nomenclature-style phrasing.
//!
//! Batch mode sends one call for N descriptions and parses a numbered
//! list back out. The batch never loses an item: any description whose
//! numbered line is missing from the response falls back to its original
//! text, and a failed call falls back entirely.

use tracing::warn;

use crate::prompts;
use crate::vision::{VisionModel, VisionRequest};

/// Rewrites product descriptions through the injected language model.
pub struct Expander<V: VisionModel> {
    model: V,
}

impl<V: VisionModel> Expander<V> {
    pub fn new(model: V) -> Self {
        Self { model }
    }

    /// Expand a single description. Any error returns the input unchanged.
    pub async fn expand_one(&self, description: &str) -> String {
        let request = VisionRequest::text(prompts::expand_prompt(description));
        match self.model.generate(&request).await {
            Ok(response) => {
                let cleaned = clean_phrase(&response);
                if cleaned.is_empty() {
                    description.to_string()
                } else {
                    cleaned
                }
            }
            Err(e) => {
                warn!("query expansion failed, keeping original: {e}");
                description.to_string()
            }
        }
    }

    /// Expand a batch of descriptions with a single call.
    ///
    /// The output always has the same length and order as the input.
    pub async fn expand_batch(&self, descriptions: &[String]) -> Vec<String> {
        match descriptions {
            [] => return Vec::new(),
            [single] => return vec![self.expand_one(single).await],
            _ => {}
        }

        let request = VisionRequest::text(prompts::expand_batch_prompt(descriptions));
        let response = match self.model.generate(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("batch expansion failed, keeping originals: {e}");
                return descriptions.to_vec();
            }
        };

        let parsed = parse_numbered_list(&response, descriptions.len());
        parsed
            .into_iter()
            .zip(descriptions)
            .map(|(expanded, original)| expanded.unwrap_or_else(|| original.clone()))
            .collect()
    }
}

/// Parse a numbered-list response into per-index slots.
///
/// Lines are matched by their `"<n>. "` prefix; out-of-range or duplicate
/// numbers and blank phrases are ignored.
pub fn parse_numbered_list(text: &str, expected: usize) -> Vec<Option<String>> {
    let mut slots = vec![None; expected];

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim_start();
        let Some((number, rest)) = line.split_once('.') else {
            continue;
        };
        let Ok(n) = number.trim().parse::<usize>() else {
            continue;
        };
        if n < 1 || n > expected || slots[n - 1].is_some() {
            continue;
        }
        let phrase = clean_phrase(rest);
        if !phrase.is_empty() {
            slots[n - 1] = Some(phrase);
        }
    }

    slots
}

/// Trim whitespace and any wrapping quotes the model added.
fn clean_phrase(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}
