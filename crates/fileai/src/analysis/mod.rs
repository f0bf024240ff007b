//! Analysis collaborator contract.
//!
//! The queue treats analysis as an opaque, slow, failure-prone call. This
//! module defines that call and a few local implementations that need no
//! external service.

pub mod keyword;
pub mod mime;
pub mod router;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use keyword::KeywordAnalyzer;
pub use router::MimeRouter;

/// Tags and summary produced for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub tags: Vec<String>,
    pub summary: String,
}

impl AnalysisResult {
    pub fn new<S: Into<String>>(tags: &[&str], summary: S) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            summary: summary.into(),
        }
    }
}

/// Errors raised by an analyzer.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to read '{path}': {source}")]
    ReadContent {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// Produces tags and a summary for a file's content.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, path: &Path, mime_type: &str)
        -> Result<AnalysisResult, AnalysisError>;
}
