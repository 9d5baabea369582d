//! Deterministic embedders shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ohlcv_rag::{Document, EmbeddingProvider, HashingEmbedder, RagError, Result};
use serde_json::json;

/// Maps exact texts to fixed vectors, so tests control raw similarity.
/// Unknown texts embed to the fallback vector.
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
        Self {
            table: entries.iter().map(|(text, v)| (text.to_string(), v.clone())).collect(),
            fallback,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
    }

    fn dimensions(&self) -> usize {
        self.fallback.len()
    }

    fn model_name(&self) -> &str {
        "table-stub"
    }
}

/// Always fails, to exercise error propagation.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingError {
            provider: "failing-stub".to_string(),
            message: "model unavailable".to_string(),
        })
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "failing-stub"
    }
}

/// Produces vectors of the wrong length for the dimension it reports.
pub struct MisreportingEmbedder;

#[async_trait]
impl EmbeddingProvider for MisreportingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; 4])
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "misreporting-stub"
    }
}

pub fn hashing() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedder::default())
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// A small market corpus: two tickers, dated windows, indicator averages.
pub fn market_documents() -> Vec<Document> {
    vec![
        Document::new("AAPL strong uptrend bullish momentum higher highs")
            .with_field("ticker", "AAPL")
            .with_field("end_date", "2024-01-15")
            .with_field("trend", "up")
            .with_field("rsi_avg", 68.0)
            .with_field("volatility", 0.21),
        Document::new("AAPL sideways consolidation ranging flat")
            .with_field("ticker", "AAPL")
            .with_field("end_date", "2023-06-01")
            .with_field("trend", "sideways")
            .with_field("rsi_avg", 49.5)
            .with_field("volatility", 0.12),
        Document::new("AAPL oversold downtrend bearish momentum lower lows")
            .with_field("ticker", "AAPL")
            .with_field("end_date", "2023-10-20")
            .with_field("trend", "down")
            .with_field("rsi_avg", 27.0)
            .with_field("volatility", 0.34),
        Document::new("MSFT earnings beat breakout resistance volume surge")
            .with_field("ticker", "MSFT")
            .with_field("end_date", "2024-01-10")
            .with_field("trend", "up")
            .with_field("rsi_avg", 72.0)
            .with_field("volatility", 0.18),
        Document::new("MSFT oversold downtrend lower lows")
            .with_field("ticker", "MSFT")
            .with_field("end_date", "2023-09-01")
            .with_field("trend", "down")
            .with_field("rsi_avg", 24.0)
            .with_field("volatility", 0.29)
            .with_field("summary", json!("capitulation selling")),
    ]
}
