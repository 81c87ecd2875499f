pub mod tesseract;

pub use tesseract::TesseractEngine;

use crate::error::OcrError;

/// Turns one raster image into text.
///
/// Implementations must be shareable across the OCR worker threads.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8], language: &str) -> Result<String, OcrError>;
}

/// Runs the engine over one image and trims the recognized text.
pub fn recover_text(
    engine: &dyn OcrEngine,
    image: &[u8],
    language: &str,
) -> Result<String, OcrError> {
    let _span = tracing::debug_span!("ocr", bytes = image.len(), language).entered();
    let text = engine.recognize(image, language)?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl OcrEngine for Fixed {
        fn recognize(&self, _image: &[u8], _language: &str) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl OcrEngine for Broken {
        fn recognize(&self, _image: &[u8], _language: &str) -> Result<String, OcrError> {
            Err(OcrError::Recognition("engine crashed".to_string()))
        }
    }

    #[test]
    fn test_recover_text_trims() {
        let text = recover_text(&Fixed("  \n Boleto 123 \n\n"), b"img", "por").unwrap();
        assert_eq!(text, "Boleto 123");
    }

    #[test]
    fn test_recover_text_propagates_failure() {
        let err = recover_text(&Broken, b"img", "por").unwrap_err();
        assert!(matches!(err, OcrError::Recognition(_)));
    }
}
