//! Rerankers that reorder search results after retrieval.
//!
//! [`ResultRanker`] combines the backend similarity with three secondary
//! signals into a `ranking_score`:
//!
//! | factor | default weight | value |
//! |---|---|---|
//! | similarity | 0.4 | backend score, unchanged |
//! | recency | 0.2 | `max(0, 1 - days_since(end_date) / 365)`, 0.5 if undated |
//! | completeness | 0.2 | share of [`IMPORTANT_FIELDS`] present |
//! | relevance | 0.2 | share of query terms found in the text or summary |

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::SearchResult;
use crate::error::{RagError, Result};

/// Metadata fields a complete window summary carries.
pub const IMPORTANT_FIELDS: [&str; 5] =
    ["trend", "avg_volume", "volatility", "price_range", "rsi_avg"];

/// Recency assigned when `end_date` is missing or unparseable.
pub const NEUTRAL_RECENCY: f32 = 0.5;

const END_DATE_FIELD: &str = "end_date";
const SUMMARY_FIELD: &str = "summary";

/// A reranker that re-scores and reorders search results.
///
/// Implementations can use cross-encoder models, LLM-based scoring, or
/// other strategies to improve precision beyond initial vector similarity.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank search results given the original query.
    ///
    /// Returns results in a new order with potentially updated scores.
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

/// A no-op reranker that returns results unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use ohlcv_rag::{NoOpReranker, Reranker};
///
/// let reranked = NoOpReranker.rerank("query", results).await?;
/// // same order, same scores
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        Ok(results)
    }
}

/// Weights of the four ranking factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Weight of the backend similarity score.
    pub similarity: f32,
    /// Weight of the recency factor.
    pub recency: f32,
    /// Weight of the metadata completeness factor.
    pub completeness: f32,
    /// Weight of the lexical relevance factor.
    pub relevance: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self { similarity: 0.4, recency: 0.2, completeness: 0.2, relevance: 0.2 }
    }
}

impl RankingWeights {
    /// Check that every weight is finite and non-negative and at least one
    /// is positive.
    pub fn validate(&self) -> Result<()> {
        let weights = [self.similarity, self.recency, self.completeness, self.relevance];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RagError::ConfigError(format!(
                "ranking weights must be finite and non-negative, got {self:?}"
            )));
        }
        if weights.iter().all(|w| *w == 0.0) {
            return Err(RagError::ConfigError("ranking weights must not all be zero".to_string()));
        }
        Ok(())
    }
}

/// The per-factor values behind a ranking score, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingFactors {
    /// Backend similarity.
    pub similarity: f32,
    /// Recency of `end_date`.
    pub recency: f32,
    /// Metadata completeness.
    pub completeness: f32,
    /// Lexical overlap with the query.
    pub relevance: f32,
}

impl RankingFactors {
    /// Weighted sum of the factors.
    pub fn combine(&self, weights: &RankingWeights) -> f32 {
        self.similarity * weights.similarity
            + self.recency * weights.recency
            + self.completeness * weights.completeness
            + self.relevance * weights.relevance
    }
}

/// Multi-factor ranker for OHLCV window results.
///
/// Ranking is deterministic for a fixed reference date. Results with
/// equal ranking scores keep their input order.
#[derive(Debug, Clone, Default)]
pub struct ResultRanker {
    weights: RankingWeights,
    reference_date: Option<NaiveDate>,
}

impl ResultRanker {
    /// A ranker with default weights, measuring recency from today (UTC).
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom weights.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the weights are invalid.
    pub fn with_weights(mut self, weights: RankingWeights) -> Result<Self> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    /// Measure recency from a fixed date instead of today.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// The configured weights.
    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    fn today(&self) -> NaiveDate {
        self.reference_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Compute the ranking factors of a single result.
    pub fn factors(&self, result: &SearchResult, query: &str) -> RankingFactors {
        RankingFactors {
            similarity: result.score.clamp(0.0, 1.0),
            recency: recency(result.metadata.get(END_DATE_FIELD), self.today()),
            completeness: completeness(result),
            relevance: relevance(result, query),
        }
    }

    /// Return a new list with `ranking_score` set on every result, sorted
    /// by descending ranking score. The input is not modified.
    pub fn rank(&self, results: &[SearchResult], query: &str) -> Vec<SearchResult> {
        let mut ranked: Vec<SearchResult> = results
            .iter()
            .map(|result| {
                let mut result = result.clone();
                result.ranking_score = Some(self.factors(&result, query).combine(&self.weights));
                result
            })
            .collect();

        // `sort_by` is stable: ties keep the similarity order.
        ranked.sort_by(|a, b| {
            let a = a.ranking_score.unwrap_or(0.0);
            let b = b.ranking_score.unwrap_or(0.0);
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

#[async_trait]
impl Reranker for ResultRanker {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        Ok(self.rank(&results, query))
    }
}

/// Parse `YYYY-MM-DD`, also accepting a timestamp with that date prefix.
fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

fn recency(end_date: Option<&Value>, today: NaiveDate) -> f32 {
    let Some(date) = end_date.and_then(Value::as_str).and_then(parse_date) else {
        return NEUTRAL_RECENCY;
    };
    let days = (today - date).num_days() as f32;
    (1.0 - days / 365.0).clamp(0.0, 1.0)
}

fn completeness(result: &SearchResult) -> f32 {
    let present = IMPORTANT_FIELDS
        .iter()
        .filter(|field| result.metadata.get(**field).is_some_and(|v| !v.is_null()))
        .count();
    present as f32 / IMPORTANT_FIELDS.len() as f32
}

fn relevance(result: &SearchResult, query: &str) -> f32 {
    let query = query.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }

    let mut content = result.document.to_lowercase();
    if let Some(summary) = result.metadata_str(SUMMARY_FIELD) {
        content.push(' ');
        content.push_str(&summary.to_lowercase());
    }

    let hits = terms.iter().filter(|term| content.contains(**term)).count();
    hits as f32 / terms.len() as f32
}
