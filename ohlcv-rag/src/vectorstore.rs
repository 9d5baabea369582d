//! The uniform contract every vector store backend satisfies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{Document, IndexedDocument, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::FilterExpression;
use crate::similarity::DistanceMetric;

/// Default chunk size for [`VectorStoreAdapter::batch_add_documents`].
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Static capability descriptor of a backend.
///
/// Consumed by the [`VectorStoreManager`](crate::VectorStoreManager) and by
/// callers doing capability-based backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Needs a separately running server process.
    pub requires_server: bool,
    /// Survives process restarts.
    pub persistent: bool,
    /// Accepts metadata filters (natively or by post-filtering).
    pub supports_filtering: bool,
    /// Updates in place. When `false`, updates are emulated as
    /// delete plus reinsert.
    pub supports_updates: bool,
}

/// Collection size a backend is suited for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    /// Up to roughly a hundred thousand documents.
    #[default]
    Small,
    /// Up to a few million documents.
    Medium,
    /// More than that.
    Large,
}

/// What a registered backend offers, known before any adapter is built.
///
/// `capabilities` describes the backend configured for them: a flat index
/// is listed as persistent, though an instance without a
/// `persist_directory` reports `persistent: false` from
/// [`VectorStoreAdapter::adapter_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// Human readable engine name.
    pub name: &'static str,
    /// Native score the engine reports before conversion.
    pub distance_metric: DistanceMetric,
    /// Capability flags.
    pub capabilities: Capabilities,
    /// Largest collection size the backend handles well.
    pub scale: Scale,
}

/// Identity and capabilities of an adapter instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Human readable engine name.
    pub name: String,
    /// Registry key of the backend.
    pub store_type: String,
    /// Collection owned by this adapter.
    pub collection_name: String,
    /// Embedding model identity bound to the collection.
    pub embedding_model: String,
    /// Vector dimension of the collection.
    pub embedding_dimension: usize,
    /// Native score the engine reports before conversion.
    pub distance_metric: DistanceMetric,
    /// Capability flags.
    pub capabilities: Capabilities,
}

/// What every adapter is constructed with: the collection it owns and the
/// shared embedding provider.
#[derive(Clone)]
pub struct AdapterContext {
    /// Collection name.
    pub collection_name: String,
    /// Shared embedding provider.
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl AdapterContext {
    /// Create a context.
    pub fn new(collection_name: impl Into<String>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { collection_name: collection_name.into(), embedder }
    }
}

impl std::fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("collection_name", &self.collection_name)
            .field("embedding_model", &self.embedder.model_name())
            .finish()
    }
}

/// A backend-specific implementation of the vector store contract.
///
/// Each adapter owns exactly one collection. It embeds text through the
/// shared [`EmbeddingProvider`], converts its native distance into a
/// similarity in `[0, 1]`, translates [`FilterExpression`]s into its own
/// filter syntax and emulates whatever its engine cannot do natively, so
/// the manager and retriever never special-case backends.
///
/// # Example
///
/// ```rust,ignore
/// use ohlcv_rag::{Document, InMemoryAdapter, VectorStoreAdapter};
///
/// let store = InMemoryAdapter::new(context);
/// let ids = store.add_documents(&[Document::new("AAPL uptrend")], None).await?;
/// let results = store.search("AAPL", 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Embed and store documents. Generates UUIDs when `ids` is `None`.
    /// An existing id is replaced.
    ///
    /// Returns the ids in input order.
    async fn add_documents(
        &self,
        documents: &[Document],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>>;

    /// Return at most `n` results sorted by descending similarity.
    async fn search(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchResult>>;

    /// Delete documents by id. Unknown ids are ignored.
    async fn delete_documents(&self, ids: &[String]) -> Result<()>;

    /// Replace text and vector (and metadata, if given) when `documents`
    /// is given, otherwise replace metadata only.
    async fn update_documents(
        &self,
        ids: &[String],
        documents: Option<&[String]>,
        metadatas: Option<&[Metadata]>,
    ) -> Result<()>;

    /// Look up stored documents by id. Missing ids are skipped.
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<IndexedDocument>>;

    /// Number of documents in the collection.
    async fn get_document_count(&self) -> Result<usize>;

    /// Destroy the collection and recreate it empty.
    async fn clear_collection(&self) -> Result<()>;

    /// Static identity and capability descriptor.
    fn adapter_info(&self) -> AdapterInfo;

    /// Flush state to durable storage.
    ///
    /// Stores that persist on every write return `Ok(())`; stores that
    /// cannot persist at all fail with [`RagError::CapabilityError`].
    async fn persist(&self) -> Result<()> {
        let info = self.adapter_info();
        if info.capabilities.persistent {
            Ok(())
        } else {
            Err(RagError::capability("persist", info.store_type, "store is not persistent"))
        }
    }

    /// Add documents in sequential chunks of `batch_size` so large ingest
    /// jobs never build one oversized native request.
    async fn batch_add_documents(
        &self,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<Vec<String>> {
        if batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        let mut all_ids = Vec::with_capacity(documents.len());
        for (batch, chunk) in documents.chunks(batch_size).enumerate() {
            let ids = self.add_documents(chunk, None).await?;
            debug!(batch, count = ids.len(), "indexed batch");
            all_ids.extend(ids);
        }
        Ok(all_ids)
    }

    /// Search, then drop results scoring below `score_threshold`.
    async fn similarity_search_with_score(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let results = self.search(query, n, filter).await?;
        Ok(results.into_iter().filter(|r| r.score >= score_threshold).collect())
    }
}

/// Use the caller's ids or generate UUID v4 strings.
pub(crate) fn resolve_ids(count: usize, ids: Option<&[String]>) -> Result<Vec<String>> {
    match ids {
        Some(ids) if ids.len() != count => Err(RagError::ConfigError(format!(
            "got {} ids for {count} documents",
            ids.len()
        ))),
        Some(ids) => Ok(ids.to_vec()),
        None => Ok((0..count).map(|_| uuid::Uuid::new_v4().to_string()).collect()),
    }
}

/// Positions to write when `ids` may repeat within one call.
///
/// Only the last occurrence of each id is kept, in input order, so a
/// batch write ends in the same state as the equivalent single writes.
pub(crate) fn last_occurrences(ids: &[String]) -> Vec<usize> {
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        last.insert(id.as_str(), i);
    }
    (0..ids.len()).filter(|&i| last[ids[i].as_str()] == i).collect()
}

/// Validate that optional update payloads line up with `ids`.
pub(crate) fn check_update_lengths(
    ids: &[String],
    documents: Option<&[String]>,
    metadatas: Option<&[Metadata]>,
) -> Result<()> {
    if let Some(documents) = documents {
        if documents.len() != ids.len() {
            return Err(RagError::ConfigError(format!(
                "got {} documents for {} ids",
                documents.len(),
                ids.len()
            )));
        }
    }
    if let Some(metadatas) = metadatas {
        if metadatas.len() != ids.len() {
            return Err(RagError::ConfigError(format!(
                "got {} metadatas for {} ids",
                metadatas.len(),
                ids.len()
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_limit(n: usize) -> Result<()> {
    if n == 0 {
        return Err(RagError::ConfigError("n must be at least 1".to_string()));
    }
    Ok(())
}

/// Embed texts and check every vector against the collection dimension.
pub(crate) async fn embed_texts(
    embedder: &dyn EmbeddingProvider,
    texts: &[&str],
    dimensions: usize,
    operation: &str,
    backend: &str,
) -> Result<Vec<Vec<f32>>> {
    let vectors =
        embedder.embed_batch(texts).await.map_err(|e| e.in_operation(operation, backend))?;
    if vectors.len() != texts.len() {
        return Err(RagError::operation(
            operation,
            backend,
            format!("embedder returned {} vectors for {} texts", vectors.len(), texts.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(RagError::operation(
            operation,
            backend,
            format!(
                "dimension mismatch: collection expects {dimensions}, model '{}' produced {}",
                embedder.model_name(),
                bad.len()
            ),
        ));
    }
    Ok(vectors)
}

/// Embed a single query string.
pub(crate) async fn embed_query(
    embedder: &dyn EmbeddingProvider,
    query: &str,
    dimensions: usize,
    backend: &str,
) -> Result<Vec<f32>> {
    let mut vectors = embed_texts(embedder, &[query], dimensions, "search", backend).await?;
    vectors.pop().ok_or_else(|| RagError::operation("search", backend, "no query embedding"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_ids_generates_unique_uuids() {
        let ids = resolve_ids(3, None).unwrap();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert!(uuid::Uuid::parse_str(&ids[2]).is_ok());
    }

    #[test]
    fn resolve_ids_rejects_length_mismatch() {
        let ids = vec!["a".to_string()];
        assert!(resolve_ids(2, Some(&ids)).is_err());
        assert_eq!(resolve_ids(1, Some(&ids)).unwrap(), ids);
    }

    #[test]
    fn repeated_ids_keep_last_position() {
        let ids: Vec<String> = ["a", "b", "a", "c", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(last_occurrences(&ids), vec![2, 3, 4]);
        assert_eq!(last_occurrences(&[]), Vec::<usize>::new());
    }

    #[test]
    fn update_lengths_must_match() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let docs = vec!["x".to_string()];
        assert!(check_update_lengths(&ids, Some(&docs), None).is_err());
        assert!(check_update_lengths(&ids, None, None).is_ok());
    }
}
