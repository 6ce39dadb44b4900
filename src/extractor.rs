//! Document extraction: raw bytes in, header plus ordered line items out.
//!
//! Orchestrates the splitter, the batch executor, and the repair layer
//! around the vision model. Routing is a deliberate cost trade-off:
//!
//! - images and small or encrypted PDFs go to the model whole, header and
//!   items extracted by two parallel calls;
//! - large PDFs are split and processed page by page, sequentially, with
//!   a self-throttling delay between calls, so no single call exceeds the
//!   model's output limits.
//!
//! A failed page is logged and contributes zero items; the document as a
//! whole is only failed by terminal API errors or exhausted throttling.

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::batch::{with_retry, BatchOptions};
use crate::config::ExtractionConfig;
use crate::error::ApiError;
use crate::models::{DocumentHeader, ExtractedDocument, MediaKind, RawItem};
use crate::prompts;
use crate::repair;
use crate::split;
use crate::vision::{VisionModel, VisionRequest};

const PDF_MIME: &str = "application/pdf";

/// Turns a document into a header and an ordered item list through an
/// injected vision model.
pub struct Extractor<V: VisionModel> {
    vision: V,
    config: ExtractionConfig,
}

impl<V: VisionModel> Extractor<V> {
    pub fn new(vision: V, config: ExtractionConfig) -> Self {
        Self { vision, config }
    }

    fn retry_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.config.batch_size,
            batch_delay: std::time::Duration::from_secs(self.config.batch_delay_secs),
            max_attempts: self.config.max_attempts,
            ..BatchOptions::default()
        }
    }

    /// Extract a document of the declared media kind.
    ///
    /// Line numbers in the result are always sequential from 1,
    /// regardless of how many pages or calls were used internally.
    pub async fn extract(&self, bytes: &[u8], kind: MediaKind) -> Result<ExtractedDocument> {
        match kind {
            MediaKind::Image { mime } => self.extract_single_unit(bytes, &mime, 1, false).await,
            MediaKind::Pdf => self.extract_pdf(bytes).await,
        }
    }

    async fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractedDocument> {
        let probe = split::probe(bytes);
        debug!(
            "pdf probe: {} pages, encrypted: {}",
            probe.page_count, probe.encrypted
        );

        // Small documents fit one call; encrypted ones would split into
        // blank pages, so they are sent whole too.
        if probe.page_count <= self.config.single_call_page_limit || probe.encrypted {
            return self
                .extract_single_unit(bytes, PDF_MIME, probe.page_count.max(1), probe.encrypted)
                .await;
        }

        let pages = split::split_pages(bytes);
        if pages.is_empty() {
            // Splitting failed; fall back to treating the document as a
            // single unit.
            return self
                .extract_single_unit(bytes, PDF_MIME, probe.page_count, probe.encrypted)
                .await;
        }

        self.extract_per_page(&pages, probe.page_count).await
    }

    /// One items call and one header call over the whole payload, run in
    /// parallel.
    async fn extract_single_unit(
        &self,
        bytes: &[u8],
        mime: &str,
        page_count: usize,
        encrypted: bool,
    ) -> Result<ExtractedDocument> {
        let opts = self.retry_options();

        let header_task = || self.call_header(bytes, mime);
        let items_task = || self.call_items(bytes, mime, 1);

        let (header, items) = futures::join!(
            with_retry(&header_task, &opts),
            with_retry(&items_task, &opts),
        );

        let mut items = items.map_err(|e| anyhow!("item extraction failed: {e}"))?;
        let header = header.map_err(|e| anyhow!("header extraction failed: {e}"))?;

        renumber(&mut items);
        Ok(ExtractedDocument {
            header,
            items,
            page_count,
            encrypted,
        })
    }

    /// Header from page 1, then items page by page, sequentially, with a
    /// delay between calls to respect upstream throughput limits.
    async fn extract_per_page(
        &self,
        pages: &[Vec<u8>],
        page_count: usize,
    ) -> Result<ExtractedDocument> {
        let opts = self.retry_options();

        let header_task = || self.call_header(&pages[0], PDF_MIME);
        let header = match with_retry(&header_task, &opts).await {
            Ok(header) => header,
            Err(e) => {
                warn!("header extraction failed on page 1: {e}");
                DocumentHeader::default()
            }
        };

        let mut items: Vec<RawItem> = Vec::new();
        for (page_index, page) in pages.iter().enumerate() {
            // Pre-merge numbering per page keeps log lines attributable
            // before the final renumbering.
            let start_line = page_index as i64 * self.config.page_start_stride + 1;
            let page_task = || async move {
                match self.call_items(page, PDF_MIME, start_line).await {
                    Ok(items) => Ok(items),
                    // Throttling bubbles up so the retry/backoff policy
                    // applies; anything else costs only this page.
                    Err(ApiError::RateLimited) => Err(ApiError::RateLimited),
                    Err(e) => {
                        warn!("page {} extraction failed: {e}", page_index + 1);
                        Ok(Vec::new())
                    }
                }
            };

            let page_items = with_retry(&page_task, &opts)
                .await
                .map_err(|e| anyhow!("page {} extraction failed: {e}", page_index + 1))?;
            debug!("page {}: {} items", page_index + 1, page_items.len());
            items.extend(page_items);

            if page_index + 1 < pages.len() && !self.config.page_delay().is_zero() {
                tokio::time::sleep(self.config.page_delay()).await;
            }
        }

        renumber(&mut items);
        Ok(ExtractedDocument {
            header,
            items,
            page_count,
            encrypted: false,
        })
    }

    async fn call_header(&self, bytes: &[u8], mime: &str) -> Result<DocumentHeader, ApiError> {
        let request = VisionRequest::with_attachment(prompts::HEADER_PROMPT, mime, bytes);
        let response = self.vision.generate(&request).await?;
        Ok(repair::parse_header(&response))
    }

    async fn call_items(
        &self,
        bytes: &[u8],
        mime: &str,
        start_line: i64,
    ) -> Result<Vec<RawItem>, ApiError> {
        let request = VisionRequest::with_attachment(prompts::items_prompt(start_line), mime, bytes);
        let response = self.vision.generate(&request).await?;
        Ok(repair::parse_items(&response))
    }
}

/// Rewrite line numbers sequentially starting at 1, preserving order.
fn renumber(items: &mut [RawItem]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.line_number = index as i64 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(line: i64) -> RawItem {
        serde_json::from_value(serde_json::json!({
            "line_number": line,
            "original_description": format!("item {line}"),
        }))
        .unwrap()
    }

    #[test]
    fn renumber_is_sequential_from_one() {
        let mut items = vec![item(101), item(102), item(201), item(305)];
        renumber(&mut items);
        let numbers: Vec<i64> = items.iter().map(|i| i.line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        // Order (and thus descriptions) untouched.
        assert_eq!(items[2].original_description, "item 201");
    }
}
