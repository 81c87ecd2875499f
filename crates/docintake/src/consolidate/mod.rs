//! Builds the bounded analysis text from per-page extractions.
//!
//! Embedded text is pulled page by page until the character budget is
//! exceeded; OCR then runs over page images, again only while budget
//! remains. The combined text is line-deduplicated and, if still too
//! long, cut in the middle so both the head and the tail survive.

mod pool;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::extractor::PageExtraction;
use crate::ocr::OcrEngine;

pub use pool::OcrPool;

/// Inserted between head and tail when the text is cut.
pub const OMISSION_MARKER: &str = "\n\n[CENTRAL TEXT OMITTED]\n\n";

#[derive(Debug, Clone)]
pub struct ConsolidatorSettings {
    /// Upper bound, in characters, of the analysis text.
    pub max_chunk_size: usize,
    pub ocr_language: String,
    pub ocr_workers: usize,
}

/// Result of one consolidation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisText {
    pub text: String,
    /// How many images were handed to the OCR engine.
    pub ocr_invocations: usize,
    pub truncated: bool,
}

impl AnalysisText {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether there is enough text to be worth sending to the LLM.
    pub fn is_classifiable(&self, min_chars: usize) -> bool {
        self.text.trim().chars().count() >= min_chars
    }
}

pub struct Consolidator {
    pool: OcrPool,
    settings: ConsolidatorSettings,
}

impl Consolidator {
    pub fn new(engine: Arc<dyn OcrEngine>, settings: ConsolidatorSettings) -> Self {
        let pool = OcrPool::new(engine, settings.ocr_workers, settings.ocr_language.clone());
        Self { pool, settings }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.settings.max_chunk_size
    }

    pub fn consolidate(&self, pages: &[PageExtraction]) -> AnalysisText {
        let _span = tracing::info_span!("consolidate", pages = pages.len()).entered();
        let max = self.settings.max_chunk_size;

        let mut parts: Vec<String> = Vec::new();
        let mut used = 0usize;
        for page in pages {
            if used > max {
                break;
            }
            if page.embedded_text.is_empty() {
                continue;
            }
            used += page.embedded_text.chars().count();
            parts.push(page.embedded_text.clone());
        }
        debug!("Embedded text: {} chars from {} pages", used, parts.len());

        let ocr = self.pool.run(pages, used, max);
        parts.extend(ocr.texts);

        let deduped = dedupe_lines(&parts.join("\n"));
        let (text, truncated) = bound_length(&deduped, max);

        info!(
            chars = text.chars().count(),
            ocr_invocations = ocr.invocations,
            truncated,
            "Analysis text ready"
        );

        AnalysisText {
            text,
            ocr_invocations: ocr.invocations,
            truncated,
        }
    }
}

/// Drops empty lines and lines already seen, comparing case-insensitively
/// with whitespace collapsed. First occurrences keep their order.
pub fn dedupe_lines(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if seen.insert(key) {
            kept.push(trimmed);
        }
    }

    kept.join("\n")
}

/// Cuts `text` to at most `max` characters by keeping a prefix and a suffix
/// around [`OMISSION_MARKER`]. Returns the text and whether it was cut.
pub fn bound_length(text: &str, max: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max {
        return (text.to_string(), false);
    }

    let marker_len = OMISSION_MARKER.chars().count();
    if max <= marker_len {
        return (text.chars().take(max).collect(), true);
    }

    let keep = max - marker_len;
    let head_len = keep / 2;
    let tail_len = keep - head_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();

    (format!("{}{}{}", head, OMISSION_MARKER, tail), true)
}
