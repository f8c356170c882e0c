//! Local extraction stage.
//!
//! Extraction internals are a collaborator concern; the pipeline only needs
//! the seam plus a thin default implementation. Richer extractors (PDF, OCR)
//! plug in behind `DocumentExtractor`.

use std::path::Path;

/// Content pulled out of an accepted file, ready for analysis.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: String,
    pub text: String,
    /// Size of the raw input in bytes.
    pub byte_len: u64,
}

/// Errors from the extraction stage. These consume an item retry; a file
/// that stays malformed will converge to dead with the reason recorded.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unreadable input: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Extraction seam between the pipeline and document-format internals.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// Default extractor: takes UTF-8 content as-is and reduces binary formats
/// to a metadata stub so the rest of the pipeline still has something to
/// hand to the analysis service.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let bytes = std::fs::read(path)?;

        if bytes.is_empty() {
            return Err(ExtractError::Malformed("empty file".to_string()));
        }

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());

        let byte_len = bytes.len() as u64;
        let text = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => format!("[binary document, {} bytes]", byte_len),
        };

        Ok(ExtractedDocument {
            title,
            text,
            byte_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "limits and continuity").unwrap();

        let doc = TextExtractor.extract(&path).unwrap();
        assert_eq!(doc.title, "notes");
        assert_eq!(doc.text, "limits and continuity");
        assert_eq!(doc.byte_len, 21);
    }

    #[test]
    fn test_empty_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        let err = TextExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn test_binary_file_becomes_stub() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();

        let doc = TextExtractor.extract(&path).unwrap();
        assert!(doc.text.contains("binary document"));
        assert_eq!(doc.byte_len, 4);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = TextExtractor
            .extract(Path::new("/nonexistent/nope.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable(_)));
    }
}
