//! MIME type classification for analysis routing.

use std::path::Path;

pub const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub const DOCUMENT_TYPES: &[&str] = &["application/pdf", "text/plain", "text/markdown"];

/// Broad kind of a file, as far as analysis is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Pdf,
    Document,
    Unknown,
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileCategory::Image => write!(f, "image"),
            FileCategory::Pdf => write!(f, "pdf"),
            FileCategory::Document => write!(f, "document"),
            FileCategory::Unknown => write!(f, "unknown"),
        }
    }
}

pub fn file_category(mime_type: &str) -> FileCategory {
    if IMAGE_TYPES.contains(&mime_type) {
        FileCategory::Image
    } else if mime_type == "application/pdf" {
        FileCategory::Pdf
    } else if DOCUMENT_TYPES.contains(&mime_type) {
        FileCategory::Document
    } else {
        FileCategory::Unknown
    }
}

pub fn is_analysis_supported(mime_type: &str) -> bool {
    file_category(mime_type) != FileCategory::Unknown
}

/// Detects MIME type from file path using the mime_guess crate.
/// Returns `None` for unknown extensions.
pub fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}
