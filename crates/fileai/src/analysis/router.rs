//! Routes analysis by MIME type.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::mime::{file_category, is_analysis_supported, FileCategory};
use super::{AnalysisError, AnalysisResult, Analyzer};

/// Dispatches images and documents to dedicated analyzers.
///
/// Unsupported types are not an error: the file was stored fine, there is
/// just nothing to analyze, so a fallback result is returned.
pub struct MimeRouter {
    documents: Arc<dyn Analyzer>,
    images: Option<Arc<dyn Analyzer>>,
}

impl MimeRouter {
    pub fn new(documents: Arc<dyn Analyzer>) -> Self {
        Self {
            documents,
            images: None,
        }
    }

    pub fn with_image_analyzer(mut self, images: Arc<dyn Analyzer>) -> Self {
        self.images = Some(images);
        self
    }
}

#[async_trait]
impl Analyzer for MimeRouter {
    async fn analyze(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        log::debug!("Routing analysis for {} ({})", path.display(), mime_type);

        if !is_analysis_supported(mime_type) {
            log::warn!("Unsupported file type for analysis: {}", mime_type);
            return Ok(AnalysisResult::new(
                &["file", "unsupported"],
                "File uploaded successfully (type not supported for AI analysis)",
            ));
        }

        match file_category(mime_type) {
            FileCategory::Image => match &self.images {
                Some(images) => images.analyze(path, mime_type).await,
                None => Ok(AnalysisResult::new(
                    &["image", "upload"],
                    "Image uploaded successfully (no image analyzer configured)",
                )),
            },
            FileCategory::Pdf | FileCategory::Document | FileCategory::Unknown => {
                self.documents.analyze(path, mime_type).await
            }
        }
    }
}
