//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryAdapter`], an embedded, non-persistent
//! adapter backed by a `HashMap` protected by a `tokio::sync::RwLock`.
//! Filters are evaluated in process. Suitable for development, testing
//! and small collections.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Document, IndexedDocument, Metadata, SearchResult, sort_by_score};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::FilterExpression;
use crate::similarity::{DistanceMetric, cosine_similarity, to_similarity};
use crate::vectorstore::{
    AdapterContext, AdapterInfo, Capabilities, Scale, StoreInfo, VectorStoreAdapter, check_limit,
    check_update_lengths, embed_query, embed_texts, resolve_ids,
};

const BACKEND: &str = "memory";

/// Static descriptor registered for this backend.
pub const STORE_INFO: StoreInfo = StoreInfo {
    name: "In-memory",
    distance_metric: DistanceMetric::CosineSimilarity,
    capabilities: Capabilities {
        requires_server: false,
        persistent: false,
        supports_filtering: true,
        supports_updates: true,
    },
    scale: Scale::Small,
};

/// Configuration for [`InMemoryAdapter`]. It has no options; the type
/// exists so unknown keys in the manager config are rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {}

#[derive(Debug, Clone)]
struct StoredVector {
    text: String,
    embedding: Vec<f32>,
    metadata: Metadata,
}

/// An in-memory adapter using cosine similarity for search.
///
/// Documents are stored as id → entry. All operations are async-safe via
/// `tokio::sync::RwLock`; writers are serialized.
pub struct InMemoryAdapter {
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    documents: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryAdapter {
    /// Create a new empty in-memory collection.
    pub fn new(context: AdapterContext) -> Self {
        let dimensions = context.embedder.dimensions();
        debug!(collection = %context.collection_name, dimensions, "created in-memory collection");
        Self {
            collection_name: context.collection_name,
            embedder: context.embedder,
            dimensions,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Build from a manager config value.
    pub fn from_config(context: AdapterContext, config: MemoryConfig) -> Self {
        let MemoryConfig {} = config;
        Self::new(context)
    }

    fn unknown_id(operation: &str, id: &str) -> RagError {
        RagError::operation(operation, BACKEND, format!("document '{id}' does not exist"))
    }
}

#[async_trait]
impl VectorStoreAdapter for InMemoryAdapter {
    async fn add_documents(
        &self,
        documents: &[Document],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let ids = resolve_ids(documents.len(), ids)?;
        if documents.is_empty() {
            return Ok(ids);
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.text.as_str()).collect();
        let embeddings =
            embed_texts(self.embedder.as_ref(), &texts, self.dimensions, "add_documents", BACKEND)
                .await?;

        let mut store = self.documents.write().await;
        for ((id, document), embedding) in ids.iter().zip(documents).zip(embeddings) {
            store.insert(
                id.clone(),
                StoredVector {
                    text: document.text.clone(),
                    embedding,
                    metadata: document.metadata.clone(),
                },
            );
        }

        debug!(collection = %self.collection_name, count = ids.len(), "added documents");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchResult>> {
        check_limit(n)?;
        let embedding = embed_query(self.embedder.as_ref(), query, self.dimensions, BACKEND).await?;

        let store = self.documents.read().await;
        let mut scored: Vec<SearchResult> = store
            .iter()
            .filter(|(_, entry)| filter.is_none_or(|f| f.matches(&entry.metadata)))
            .map(|(id, entry)| {
                let raw = cosine_similarity(&entry.embedding, &embedding);
                SearchResult::new(
                    id.clone(),
                    entry.text.clone(),
                    entry.metadata.clone(),
                    to_similarity(DistanceMetric::CosineSimilarity, raw),
                )
            })
            .collect();

        sort_by_score(&mut scored);
        scored.truncate(n);
        Ok(scored)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        let mut store = self.documents.write().await;
        for id in ids {
            store.remove(id);
        }
        debug!(collection = %self.collection_name, count = ids.len(), "deleted documents");
        Ok(())
    }

    async fn update_documents(
        &self,
        ids: &[String],
        documents: Option<&[String]>,
        metadatas: Option<&[Metadata]>,
    ) -> Result<()> {
        check_update_lengths(ids, documents, metadatas)?;

        let embeddings = match documents {
            Some(documents) => {
                let texts: Vec<&str> = documents.iter().map(String::as_str).collect();
                Some(
                    embed_texts(
                        self.embedder.as_ref(),
                        &texts,
                        self.dimensions,
                        "update_documents",
                        BACKEND,
                    )
                    .await?,
                )
            }
            None => None,
        };

        let mut store = self.documents.write().await;
        if let Some(missing) = ids.iter().find(|id| !store.contains_key(*id)) {
            return Err(Self::unknown_id("update_documents", missing));
        }
        for (i, id) in ids.iter().enumerate() {
            let Some(entry) = store.get_mut(id) else { continue };
            if let (Some(documents), Some(embeddings)) = (documents, &embeddings) {
                entry.text = documents[i].clone();
                entry.embedding = embeddings[i].clone();
            }
            if let Some(metadatas) = metadatas {
                entry.metadata = metadatas[i].clone();
            }
        }
        Ok(())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<IndexedDocument>> {
        let store = self.documents.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                store.get(id).map(|entry| IndexedDocument {
                    id: id.clone(),
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                })
            })
            .collect())
    }

    async fn get_document_count(&self) -> Result<usize> {
        Ok(self.documents.read().await.len())
    }

    async fn clear_collection(&self) -> Result<()> {
        self.documents.write().await.clear();
        debug!(collection = %self.collection_name, "cleared in-memory collection");
        Ok(())
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: STORE_INFO.name.to_string(),
            store_type: BACKEND.to_string(),
            collection_name: self.collection_name.clone(),
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dimension: self.dimensions,
            distance_metric: STORE_INFO.distance_metric,
            capabilities: STORE_INFO.capabilities,
        }
    }
}
