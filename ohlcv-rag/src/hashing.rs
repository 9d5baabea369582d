//! Deterministic feature-hashing embedder.
//!
//! [`HashingEmbedder`] maps each lower-cased alphanumeric token to a
//! signed bucket via SHA-256 and L2-normalizes the resulting bag of
//! words. It needs no model download, so it backs tests and offline runs;
//! identical texts always produce identical vectors.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::embedding::{EmbeddingProvider, normalize};
use crate::error::{RagError, Result};

/// Default number of hash buckets.
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

/// A bag-of-words embedder using the hashing trick.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_name: String,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, model_name: format!("hashing-bow-{dimensions}") }
    }

    /// Embed synchronously. Used by the async trait method.
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimensions == 0 {
            return Err(RagError::EmbeddingError {
                provider: self.model_name.clone(),
                message: "dimensions must be greater than zero".to_string(),
            });
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn identical_text_gives_identical_unit_vector() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_sync("AAPL uptrend strong gains").unwrap();
        let b = embedder.embed_sync("aapl UPTREND strong, gains").unwrap();
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_sync("AAPL uptrend").unwrap();
        let close = embedder.embed_sync("AAPL uptrend strong gains").unwrap();
        let far = embedder.embed_sync("MSFT earnings beat").unwrap();
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_sync("  ").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_dimensions_is_an_error() {
        assert!(HashingEmbedder::new(0).embed_sync("x").is_err());
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let embedder = HashingEmbedder::default();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
        assert_eq!(embedder.model_name(), "hashing-bow-384");
    }
}
