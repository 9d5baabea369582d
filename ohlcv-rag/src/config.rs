//! Configuration for the retriever.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for the [`Retriever`](crate::Retriever).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrieverConfig {
    /// Result count used when the caller does not give one.
    pub default_n_results: usize,
    /// Minimum similarity score; results below it are dropped.
    pub similarity_threshold: f32,
    /// Whether results are reordered by the result ranker.
    pub rerank_enabled: bool,
    /// How many candidates to fetch per requested result.
    pub fetch_multiplier: usize,
    /// Query text embedded for metadata-only retrieval.
    pub metadata_query: String,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_n_results: 5,
            similarity_threshold: 0.7,
            rerank_enabled: true,
            fetch_multiplier: 2,
            metadata_query: "OHLCV data analysis".to_string(),
        }
    }
}

impl RetrieverConfig {
    /// Create a new builder for constructing a [`RetrieverConfig`].
    pub fn builder() -> RetrieverConfigBuilder {
        RetrieverConfigBuilder::default()
    }

    /// Check the same constraints as [`RetrieverConfigBuilder::build`].
    /// Useful after deserializing.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.default_n_results == 0 {
            return Err(RagError::ConfigError(
                "default_n_results must be greater than zero".to_string(),
            ));
        }
        if self.fetch_multiplier == 0 {
            return Err(RagError::ConfigError(
                "fetch_multiplier must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RetrieverConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrieverConfigBuilder {
    config: RetrieverConfig,
}

impl RetrieverConfigBuilder {
    /// Set the default number of results.
    pub fn default_n_results(mut self, n: usize) -> Self {
        self.config.default_n_results = n;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Enable or disable reranking.
    pub fn rerank_enabled(mut self, enabled: bool) -> Self {
        self.config.rerank_enabled = enabled;
        self
    }

    /// Set the over-fetch multiplier.
    pub fn fetch_multiplier(mut self, multiplier: usize) -> Self {
        self.config.fetch_multiplier = multiplier;
        self
    }

    /// Set the placeholder query used by metadata-only retrieval.
    pub fn metadata_query(mut self, query: impl Into<String>) -> Self {
        self.config.metadata_query = query.into();
        self
    }

    /// Build the [`RetrieverConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `similarity_threshold` is outside `[0, 1]` or NaN
    /// - `default_n_results == 0`
    /// - `fetch_multiplier == 0`
    pub fn build(self) -> Result<RetrieverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
