//! OCR engine seam.
//!
//! The real engine lives outside this crate. The content tier only needs
//! plain text; engine failures degrade that tier to a skip, never to an
//! admission error.

use super::DedupError;

/// Text extraction from a scanned image or page render.
pub trait OcrEngine: Send + Sync {
    /// Extract machine-readable text from raw image bytes. May return an
    /// empty string for blank or unreadable pages.
    fn extract_text(&self, image_bytes: &[u8]) -> Result<String, DedupError>;
}

/// Allow `Box<dyn OcrEngine>` wherever an `impl OcrEngine` is expected.
impl OcrEngine for Box<dyn OcrEngine> {
    fn extract_text(&self, image_bytes: &[u8]) -> Result<String, DedupError> {
        (**self).extract_text(image_bytes)
    }
}

/// Canned-text OCR for tests and offline wiring.
pub struct MockOcr {
    text: String,
}

impl MockOcr {
    pub fn returning(text: &str) -> Self {
        Self { text: text.to_string() }
    }
}

impl OcrEngine for MockOcr {
    fn extract_text(&self, _image_bytes: &[u8]) -> Result<String, DedupError> {
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_canned_text() {
        let ocr = MockOcr::returning("invoice total due 410.00");
        let text = ocr.extract_text(b"fake image bytes").unwrap();
        assert_eq!(text, "invoice total due 410.00");
    }

    #[test]
    fn trait_is_object_safe() {
        fn _assert(_: &dyn OcrEngine) {}
    }
}
