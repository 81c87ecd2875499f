pub mod image;
pub mod pdf;

pub use pdf::PdfExtractor;

/// Text and raster images recovered from a single page.
///
/// Never persisted: produced per page and consumed by the consolidator.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    /// 1-based page number.
    pub page_number: u32,
    pub embedded_text: String,
    /// PNG-encoded RGBA buffers, one per distinct image on the page.
    pub images: Vec<Vec<u8>>,
}

impl PageExtraction {
    pub fn text_only(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            embedded_text: text.into(),
            images: Vec::new(),
        }
    }
}
