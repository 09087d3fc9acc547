//! Text extraction from uploaded document bytes.
//!
//! Extraction is boundary work: callers supply raw bytes plus a content
//! type, this module returns plain UTF-8 text. PDF parsing is delegated to
//! the `pdf_extract` crate; plain text and markdown pass through a UTF-8
//! check.

use crate::error::{CoragError, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Extract plain text from document bytes.
///
/// An unreadable or corrupt document is an extraction error; the caller
/// aborts document processing and no cache entry is written.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| CoragError::Extraction(format!("PDF parse failed: {}", e))),
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map_err(|e| CoragError::Extraction(format!("invalid UTF-8 text: {}", e))),
        other => Err(CoragError::Extraction(format!(
            "unsupported content type: {}",
            other
        ))),
    }
}

/// Guess a content type from a file extension. Anything unrecognized is
/// treated as plain text, which matches how the CLI is actually used.
pub fn content_type_for_path(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => MIME_PDF,
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text(b"hello document", MIME_TEXT).unwrap();
        assert_eq!(text, "hello document");
    }

    #[test]
    fn invalid_utf8_is_extraction_error() {
        let err = extract_text(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, CoragError::Extraction(_)));
    }

    #[test]
    fn invalid_pdf_is_extraction_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, CoragError::Extraction(_)));
    }

    #[test]
    fn unsupported_content_type_is_extraction_error() {
        let err = extract_text(b"zzz", "application/octet-stream").unwrap_err();
        assert!(matches!(err, CoragError::Extraction(_)));
    }

    #[test]
    fn content_type_guessing() {
        use std::path::Path;
        assert_eq!(content_type_for_path(Path::new("a.pdf")), MIME_PDF);
        assert_eq!(content_type_for_path(Path::new("a.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for_path(Path::new("a.txt")), MIME_TEXT);
        assert_eq!(content_type_for_path(Path::new("noext")), MIME_TEXT);
    }
}
