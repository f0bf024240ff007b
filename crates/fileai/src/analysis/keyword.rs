//! Offline keyword analyzer for text documents.
//!
//! Picks the most frequent non-stopword terms as tags and the first sentence
//! as summary. Plain text is decoded lossily; PDFs are read through their
//! text layer. Used when no model-backed analyzer is configured.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::{AnalysisError, AnalysisResult, Analyzer};

/// Only this many characters of a document are considered.
const MAX_CHARS: usize = 30_000;
/// Documents shorter than this (after trimming) are not analyzed.
const MIN_CHARS: usize = 10;
const MAX_TAGS: usize = 7;
const MAX_SUMMARY_CHARS: usize = 200;

const STOPWORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "because", "been", "before", "but",
    "can", "could", "did", "does", "for", "from", "had", "has", "have", "her", "here", "him",
    "his", "how", "into", "its", "just", "may", "more", "most", "not", "now", "our", "out",
    "over", "she", "should", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "too", "under", "very", "was", "were",
    "what", "when", "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

#[derive(Debug, Default, Clone)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyzes already-extracted text.
    pub fn analyze_text(&self, text: &str) -> AnalysisResult {
        let text: String = text.chars().take(MAX_CHARS).collect();
        let text = text.trim();

        if text.is_empty() {
            return AnalysisResult::new(
                &["document", "upload"],
                "Document uploaded successfully (no content to analyze).",
            );
        }
        if text.chars().count() < MIN_CHARS {
            return AnalysisResult::new(
                &["short document"],
                "Document content is too short to analyze.",
            );
        }

        AnalysisResult {
            tags: top_terms(text),
            summary: first_sentence(text),
        }
    }
}

fn top_terms(text: &str) -> Vec<String> {
    // term -> (count, first position)
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()));

    for (position, word) in words.enumerate() {
        counts
            .entry(word)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(MAX_TAGS)
        .map(|(word, _)| word)
        .collect()
}

fn first_sentence(text: &str) -> String {
    let end = text
        .find(|c: char| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|i| i + 1)
        .unwrap_or(text.len());
    let sentence = text[..end].trim();
    if sentence.chars().count() > MAX_SUMMARY_CHARS {
        let cut: String = sentence.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        sentence.to_string()
    }
}

/// Extracts the text layer of a PDF. Unparseable documents yield no text.
fn extract_pdf_text(bytes: &[u8]) -> String {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!("Failed to parse PDF, analyzing without text: {}", e);
            return String::new();
        }
    };

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    text
}

#[async_trait]
impl Analyzer for KeywordAnalyzer {
    async fn analyze(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let is_pdf = mime_type == "application/pdf";
        if !is_pdf && !mime_type.starts_with("text/") {
            return Ok(self.analyze_text(""));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AnalysisError::ReadContent {
                path: path.display().to_string(),
                source: e,
            })?;

        let text = if is_pdf {
            tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                .await
                .map_err(|e| AnalysisError::Failed(format!("PDF extraction task: {}", e)))?
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        Ok(self.analyze_text(&text))
    }
}
