//! PDF page splitting and encryption probing.
//!
//! Turns a multi-page PDF into self-contained single-page documents so
//! large invoices can be extracted page by page without exceeding the
//! vision model's per-call output limits. This boundary never raises:
//! a document that cannot be split is reported as zero pages and the
//! caller falls back to treating it as a single unit.

use anyhow::Result;
use lopdf::Document;
use tracing::warn;

/// What a cheap structural probe learned about a PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfProbe {
    /// Page count; `0` when the document could not be parsed.
    pub page_count: usize,
    /// Whether the document declares encryption. Encrypted documents
    /// split into blank pages, so callers send them whole.
    pub encrypted: bool,
}

/// Probe a PDF for page count and encryption without splitting it.
pub fn probe(bytes: &[u8]) -> PdfProbe {
    match Document::load_mem(bytes) {
        Ok(doc) => PdfProbe {
            page_count: doc.get_pages().len(),
            encrypted: doc.is_encrypted(),
        },
        Err(e) => {
            // A strict load refuses some encrypted documents outright; the
            // raw trailer still reveals the encryption dictionary.
            let encrypted = contains_encrypt_marker(bytes);
            if !encrypted {
                warn!("pdf probe failed: {e}");
            }
            PdfProbe {
                page_count: 0,
                encrypted,
            }
        }
    }
}

/// Split a PDF into one single-page document per page.
///
/// A single-page input is returned as-is (no re-encoding). Any failure
/// yields an empty list, never an error past this boundary.
pub fn split_pages(bytes: &[u8]) -> Vec<Vec<u8>> {
    match try_split(bytes) {
        Ok(pages) => pages,
        Err(e) => {
            warn!("pdf split failed, falling back to whole document: {e}");
            Vec::new()
        }
    }
}

fn try_split(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let doc = Document::load_mem(bytes)?;
    let total = doc.get_pages().len() as u32;

    if total <= 1 {
        return Ok(vec![bytes.to_vec()]);
    }

    let mut pages = Vec::with_capacity(total as usize);
    for page_no in 1..=total {
        let mut single = doc.clone();
        let others: Vec<u32> = (1..=total).filter(|n| *n != page_no).collect();
        single.delete_pages(&others);
        single.prune_objects();
        single.renumber_objects();

        let mut buf = Vec::new();
        single.save_to(&mut buf)?;
        pages.push(buf);
    }

    Ok(pages)
}

fn contains_encrypt_marker(bytes: &[u8]) -> bool {
    bytes.windows(8).any(|w| w == b"/Encrypt")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-built n-page PDF with one content stream per page.
    fn pdf_with_pages(n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let mut offsets = Vec::new();

        let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + i)).collect();

        offsets.push(out.len());
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
                kids.join(" "),
                n
            )
            .as_bytes(),
        );
        for i in 0..n {
            offsets.push(out.len());
            out.extend_from_slice(
                format!(
                    "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n",
                    3 + i
                )
                .as_bytes(),
            );
        }

        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for off in &offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                offsets.len() + 1,
                xref_start
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn probe_counts_pages() {
        let pdf = pdf_with_pages(3);
        let probe = probe(&pdf);
        assert_eq!(probe.page_count, 3);
        assert!(!probe.encrypted);
    }

    #[test]
    fn probe_garbage_is_zero_pages() {
        let probe = probe(b"definitely not a pdf");
        assert_eq!(probe.page_count, 0);
        assert!(!probe.encrypted);
    }

    #[test]
    fn single_page_returned_unchanged() {
        let pdf = pdf_with_pages(1);
        let pages = split_pages(&pdf);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0], pdf);
    }

    #[test]
    fn multi_page_splits_into_single_pages() {
        let pdf = pdf_with_pages(3);
        let pages = split_pages(&pdf);
        assert_eq!(pages.len(), 3);
        for page in &pages {
            let reparsed = Document::load_mem(page).unwrap();
            assert_eq!(reparsed.get_pages().len(), 1);
        }
    }

    #[test]
    fn garbage_splits_to_empty() {
        assert!(split_pages(b"not a pdf").is_empty());
    }

    #[test]
    fn encrypt_marker_detected_in_raw_bytes() {
        assert!(contains_encrypt_marker(
            b"trailer << /Size 6 /Root 1 0 R /Encrypt 9 0 R >>"
        ));
        assert!(!contains_encrypt_marker(&pdf_with_pages(1)));
    }

    #[test]
    fn unparseable_encrypted_pdf_flagged() {
        // Strict load fails on garbage, but the trailer marker still
        // flags encryption so the caller sends the document whole.
        let bytes = b"%PDF-1.4 garbage trailer << /Encrypt 9 0 R >>";
        let probe = probe(bytes);
        assert_eq!(probe.page_count, 0);
        assert!(probe.encrypted);
    }
}
