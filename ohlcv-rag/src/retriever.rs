//! Retrieval over the active vector store.
//!
//! The [`Retriever`] turns a text query into a final result list:
//!
//! 1. over-fetch `n * fetch_multiplier` candidates from the manager
//! 2. drop candidates below the similarity threshold
//! 3. rerank (if enabled) with the configured [`Reranker`], a
//!    [`ResultRanker`] unless replaced
//! 4. truncate to `n`
//!
//! Manager and reranker failures are never turned into empty results:
//! they increment the failure counter and propagate.
//!
//! # Example
//!
//! ```rust,ignore
//! use ohlcv_rag::{FilterExpression, Retriever, RetrieverConfig};
//!
//! let retriever = Retriever::new(RetrieverConfig::default()).with_store(manager);
//! let filter = FilterExpression::new().eq("ticker", "AAPL")?;
//! let results = retriever.retrieve("AAPL uptrend", Some(3), Some(&filter)).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::RetrieverConfig;
use crate::document::SearchResult;
use crate::error::{RagError, Result};
use crate::filter::{FilterExpression, FilterOp};
use crate::manager::VectorStoreManager;
use crate::reranker::{Reranker, ResultRanker};

/// Running retrieval statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetrievalStats {
    /// Every retrieval attempt that reached the manager.
    pub total_queries: u64,
    /// Attempts that returned results (possibly none).
    pub successful_queries: u64,
    /// Attempts where the manager raised.
    pub failed_queries: u64,
    /// Running mean of the result count over successful attempts.
    pub avg_results_returned: f64,
}

impl RetrievalStats {
    fn record_success(&mut self, returned: usize) {
        self.total_queries += 1;
        self.successful_queries += 1;
        let n = self.successful_queries as f64;
        self.avg_results_returned += (returned as f64 - self.avg_results_returned) / n;
    }

    fn record_failure(&mut self) {
        self.total_queries += 1;
        self.failed_queries += 1;
    }
}

/// A point-in-time view of a retriever.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrieverStatus {
    /// Active configuration.
    pub config: RetrieverConfig,
    /// Whether a store manager is attached.
    pub store_attached: bool,
    /// Statistics so far.
    pub stats: RetrievalStats,
}

/// Canned query text for a chart pattern. Unknown patterns are returned
/// unchanged.
pub fn pattern_query(pattern: &str) -> &str {
    match pattern.to_lowercase().as_str() {
        "uptrend" => "strong uptrend bullish momentum higher highs ascending",
        "downtrend" => "downtrend bearish momentum lower lows descending",
        "breakout" => "breakout resistance breakthrough volume surge",
        "reversal" => "trend reversal bottom top turning point",
        "consolidation" => "sideways consolidation ranging flat",
        _ => pattern,
    }
}

/// Retrieves and ranks OHLCV window summaries.
pub struct Retriever {
    config: RetrieverConfig,
    store: Option<Arc<VectorStoreManager>>,
    reranker: Arc<dyn Reranker>,
    stats: Mutex<RetrievalStats>,
}

impl Retriever {
    /// A retriever with no store attached. Retrieval fails with
    /// [`RagError::ConfigError`] until [`attach_store`](Self::attach_store)
    /// is called.
    pub fn new(config: RetrieverConfig) -> Self {
        Self {
            config,
            store: None,
            reranker: Arc::new(ResultRanker::new()),
            stats: Mutex::new(Default::default()),
        }
    }

    /// Attach a store manager.
    pub fn with_store(mut self, store: Arc<VectorStoreManager>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the reranker applied when `rerank_enabled` is set.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Attach or replace the store manager.
    pub fn attach_store(&mut self, store: Arc<VectorStoreManager>) {
        self.store = Some(store);
    }

    /// The active configuration.
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// A copy of the statistics.
    pub async fn stats(&self) -> RetrievalStats {
        *self.stats.lock().await
    }

    /// Configuration, attachment state and statistics.
    pub async fn status(&self) -> RetrieverStatus {
        RetrieverStatus {
            config: self.config.clone(),
            store_attached: self.store.is_some(),
            stats: self.stats().await,
        }
    }

    /// Retrieve up to `n_results` documents for `query`.
    ///
    /// `None` uses `default_n_results`.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if no store is attached or `n_results` is 0
    /// - any error the manager or reranker raises, after counting it as a failure
    pub async fn retrieve(
        &self,
        query: &str,
        n_results: Option<usize>,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchResult>> {
        let store = self.store.as_ref().ok_or_else(|| {
            RagError::ConfigError("no vector store manager attached to the retriever".to_string())
        })?;
        let n = n_results.unwrap_or(self.config.default_n_results);
        if n == 0 {
            return Err(RagError::ConfigError("n_results must be at least 1".to_string()));
        }

        let fetch = n.saturating_mul(self.config.fetch_multiplier);
        let candidates = match store.search(query, fetch, filter).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.stats.lock().await.record_failure();
                error!(error = %e, "retrieval failed");
                return Err(e);
            }
        };

        let fetched = candidates.len();
        let threshold = self.config.similarity_threshold;
        let passing: Vec<SearchResult> =
            candidates.into_iter().filter(|r| r.score >= threshold).collect();
        debug!(fetched, passing = passing.len(), threshold, "applied similarity threshold");

        let mut results = if self.config.rerank_enabled {
            match self.reranker.rerank(query, passing).await {
                Ok(reranked) => reranked,
                Err(e) => {
                    self.stats.lock().await.record_failure();
                    error!(error = %e, "reranking failed");
                    return Err(e);
                }
            }
        } else {
            passing
        };
        results.truncate(n);

        self.stats.lock().await.record_success(results.len());
        info!(result_count = results.len(), requested = n, "retrieval completed");
        Ok(results)
    }

    /// Retrieve by metadata alone.
    ///
    /// The configured placeholder query is still embedded and its
    /// similarity still applies, threshold included.
    pub async fn retrieve_by_metadata(
        &self,
        filter: &FilterExpression,
        n_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        self.retrieve(&self.config.metadata_query, n_results, Some(filter)).await
    }

    /// Find windows similar to a reference description.
    pub async fn retrieve_by_similarity(
        &self,
        reference: &str,
        n_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        self.retrieve(reference, n_results, None).await
    }

    /// Find windows showing a chart pattern, optionally for one ticker.
    pub async fn retrieve_by_pattern(
        &self,
        pattern: &str,
        ticker: Option<&str>,
        n_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let filter = match ticker {
            Some(ticker) => Some(FilterExpression::new().eq("ticker", ticker)?),
            None => None,
        };
        self.retrieve(pattern_query(pattern), n_results, filter.as_ref()).await
    }

    /// Find windows where an indicator meets a condition.
    ///
    /// For RSI with `above`/`below` the condition is also enforced on
    /// the `rsi_avg` metadata field.
    pub async fn retrieve_by_indicator(
        &self,
        indicator: &str,
        condition: &str,
        threshold: f64,
        ticker: Option<&str>,
        n_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let query = format!("{indicator} {condition} {threshold}");

        let mut filter = FilterExpression::new();
        if let Some(ticker) = ticker {
            filter = filter.eq("ticker", ticker)?;
        }
        if indicator.eq_ignore_ascii_case("rsi") {
            match condition.to_lowercase().as_str() {
                "above" => filter = filter.and("rsi_avg", FilterOp::Gte, threshold)?,
                "below" => filter = filter.and("rsi_avg", FilterOp::Lte, threshold)?,
                _ => {}
            }
        }

        let filter = (!filter.is_empty()).then_some(filter);
        self.retrieve(&query, n_results, filter.as_ref()).await
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .field("store_attached", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average_covers_successes_only() {
        let mut stats = RetrievalStats::default();
        stats.record_success(2);
        stats.record_failure();
        stats.record_success(4);
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.successful_queries, 2);
        assert_eq!(stats.failed_queries, 1);
        assert!((stats.avg_results_returned - 3.0).abs() < 1e-9);
    }

    #[test]
    fn known_patterns_expand() {
        assert_eq!(pattern_query("breakout"), "breakout resistance breakthrough volume surge");
        assert_eq!(
            pattern_query("Uptrend"),
            "strong uptrend bullish momentum higher highs ascending"
        );
        assert_eq!(pattern_query("double bottom"), "double bottom");
    }
}
