//! Data types for indexed documents and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to a document: ticker, date range, trend label,
/// volatility, average volume, indicator averages and so on.
pub type Metadata = HashMap<String, Value>;

/// A window summary ready to be indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The text that gets embedded.
    pub text: String,
    /// Key-value metadata used for filtering and ranking.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), metadata: Metadata::new() }
    }

    /// Add a single metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A document as stored in a collection, looked up by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    /// The document identifier.
    pub id: String,
    /// The document text.
    pub text: String,
    /// The document metadata.
    pub metadata: Metadata,
}

/// A retrieved document with its unified similarity score.
///
/// `score` is always a similarity in `[0, 1]` (higher is more relevant),
/// never a raw backend distance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The document identifier.
    pub id: String,
    /// The document text.
    pub document: String,
    /// The document metadata.
    pub metadata: Metadata,
    /// Similarity score in `[0, 1]`.
    pub score: f32,
    /// Multi-factor score assigned by the result ranker, if reranked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking_score: Option<f32>,
}

impl SearchResult {
    /// Create a result without a ranking score.
    pub fn new(
        id: impl Into<String>,
        document: impl Into<String>,
        metadata: Metadata,
        score: f32,
    ) -> Self {
        Self { id: id.into(), document: document.into(), metadata, score, ranking_score: None }
    }

    /// Look up a string metadata field.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Sort results by descending score, breaking ties by id so output does
/// not depend on hash map iteration order.
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
