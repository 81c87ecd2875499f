use std::io::Cursor;
use std::sync::Arc;

use crate::error::OcrError;
use crate::ocr::OcrEngine;

/// Tesseract-backed engine. A fresh `LepTess` handle is created per image
/// so the engine can be shared across threads.
#[derive(Clone)]
pub struct TesseractEngine {
    inner: Arc<TesseractInner>,
}

struct TesseractInner {
    /// Directory holding `*.traineddata`; `None` uses Tesseract's default.
    data_path: Option<String>,
}

impl TesseractEngine {
    pub fn new(data_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(TesseractInner { data_path }),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Accepts `"por"`, `"por+eng"` or `"por, eng"` and yields Tesseract's
/// `+`-joined form, falling back to English.
pub fn language_spec(language: &str) -> String {
    let parts: Vec<&str> = language
        .split(['+', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        "eng".to_string()
    } else {
        parts.join("+")
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image: &[u8], language: &str) -> Result<String, OcrError> {
        let _span = tracing::info_span!("ocr.tesseract").entered();

        let img = image::load_from_memory(image)
            .map_err(|e| OcrError::LoadImage(e.to_string()))?;

        // leptess reads PNG reliably; normalise whatever arrived.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| OcrError::LoadImage(format!("convert to PNG: {}", e)))?;

        let mut lt = leptess::LepTess::new(self.inner.data_path.as_deref(), &language_spec(language))
            .map_err(|e| OcrError::EngineInit(e.to_string()))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| OcrError::Recognition(format!("set image: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| OcrError::Recognition(e.to_string()))
    }
}
