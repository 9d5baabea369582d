//! The store manager: one facade over whichever backend is active.
//!
//! [`VectorStoreManager`] owns exactly one adapter at a time and delegates
//! every operation to it. [`switch_store`](VectorStoreManager::switch_store)
//! swaps the backend at runtime; the old collection is left where it is
//! and nothing is migrated.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ohlcv_rag::{HashingEmbedder, VectorStoreManager};
//! use serde_json::json;
//!
//! let embedder = Arc::new(HashingEmbedder::default());
//! let manager = VectorStoreManager::create("memory", "ohlcv", embedder, json!({})).await?;
//! manager.add_documents(&documents, None).await?;
//!
//! // Later, move future traffic to a persistent index.
//! manager.switch_store("flat", json!({"persist_directory": "./index"})).await?;
//! ```

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::document::{Document, IndexedDocument, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::FilterExpression;
use crate::registry::AdapterRegistry;
use crate::vectorstore::{AdapterContext, AdapterInfo, Scale, StoreInfo, VectorStoreAdapter};

/// What the caller optimizes for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Query latency.
    Speed,
    /// Balanced defaults.
    #[default]
    Balanced,
    /// Operational simplicity.
    Simplicity,
}

/// Deployment requirements for backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRequirements {
    /// A separately running server is acceptable.
    pub need_server: bool,
    /// Metadata filtering is required.
    pub need_filtering: bool,
    /// Data must survive restarts.
    pub need_persistence: bool,
    /// Expected collection size.
    pub scale: Scale,
    /// What to optimize for.
    pub priority: Priority,
}

struct ActiveStore {
    store_type: String,
    adapter: Arc<dyn VectorStoreAdapter>,
}

/// Facade over the active [`VectorStoreAdapter`].
///
/// All methods take `&self`; the active adapter sits behind a
/// `tokio::sync::RwLock` so it can be replaced while the manager is shared.
pub struct VectorStoreManager {
    registry: AdapterRegistry,
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    active: RwLock<ActiveStore>,
}

impl VectorStoreManager {
    /// Create a manager with the default registry.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownStore`] if `store_type` is not registered,
    /// [`RagError::ConfigError`] for an invalid backend config, or whatever
    /// the backend raises while connecting.
    pub async fn create(
        store_type: &str,
        collection_name: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: Value,
    ) -> Result<Self> {
        let registry = AdapterRegistry::default();
        Self::with_registry(registry, store_type, collection_name, embedder, config).await
    }

    /// Create a manager resolving `store_type` against a custom registry.
    pub async fn with_registry(
        registry: AdapterRegistry,
        store_type: &str,
        collection_name: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: Value,
    ) -> Result<Self> {
        let collection_name = collection_name.into();
        let key = registry.resolve(store_type)?.to_string();
        let context = AdapterContext::new(collection_name.clone(), embedder.clone());
        let adapter = registry.create(&key, context, config).await.map_err(|e| {
            error!(
                store_type = %key,
                collection = %collection_name,
                error = %e,
                "failed to create vector store"
            );
            e
        })?;

        info!(store_type = %key, collection = %collection_name, "vector store ready");
        Ok(Self {
            registry,
            collection_name,
            embedder,
            active: RwLock::new(ActiveStore { store_type: key, adapter }),
        })
    }

    /// Replace the active backend. The previous collection is not migrated.
    ///
    /// On failure the previous backend stays active.
    pub async fn switch_store(&self, store_type: &str, config: Value) -> Result<()> {
        let key = self.registry.resolve(store_type)?.to_string();
        let context = AdapterContext::new(self.collection_name.clone(), self.embedder.clone());
        let adapter = self.registry.create(&key, context, config).await.map_err(|e| {
            error!(
                store_type = %key,
                collection = %self.collection_name,
                error = %e,
                "failed to switch vector store"
            );
            e
        })?;

        let mut active = self.active.write().await;
        let previous = std::mem::replace(&mut active.store_type, key);
        active.adapter = adapter;
        info!(
            from = %previous,
            to = %active.store_type,
            collection = %self.collection_name,
            "switched vector store"
        );
        Ok(())
    }

    async fn adapter(&self) -> Arc<dyn VectorStoreAdapter> {
        self.active.read().await.adapter.clone()
    }

    fn log_failure(&self, operation: &'static str) -> impl Fn(RagError) -> RagError + '_ {
        move |e| {
            error!(
                operation,
                collection = %self.collection_name,
                error = %e,
                "vector store operation failed"
            );
            e
        }
    }

    /// Registry key of the active backend.
    pub async fn store_type(&self) -> String {
        self.active.read().await.store_type.clone()
    }

    /// The collection every adapter of this manager owns.
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// The shared embedding provider.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Identity and capabilities of the active backend.
    pub async fn adapter_info(&self) -> AdapterInfo {
        self.adapter().await.adapter_info()
    }

    /// Store keys this manager can switch to.
    pub fn available_stores(&self) -> Vec<String> {
        self.registry.available_stores()
    }

    /// Descriptor of a backend this manager can switch to.
    pub fn store_info(&self, store_type: &str) -> Result<StoreInfo> {
        self.registry.store_info(store_type)
    }

    /// Descriptors of every backend this manager can switch to.
    pub fn all_stores_info(&self) -> BTreeMap<String, StoreInfo> {
        self.registry.all_stores_info()
    }

    /// See [`VectorStoreAdapter::add_documents`].
    pub async fn add_documents(
        &self,
        documents: &[Document],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        self.adapter()
            .await
            .add_documents(documents, ids)
            .await
            .map_err(self.log_failure("add_documents"))
    }

    /// See [`VectorStoreAdapter::batch_add_documents`].
    pub async fn batch_add_documents(
        &self,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<Vec<String>> {
        let ids = self
            .adapter()
            .await
            .batch_add_documents(documents, batch_size)
            .await
            .map_err(self.log_failure("batch_add_documents"))?;
        info!(
            collection = %self.collection_name,
            count = ids.len(),
            batch_size,
            "batch indexing completed"
        );
        Ok(ids)
    }

    /// See [`VectorStoreAdapter::search`].
    pub async fn search(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchResult>> {
        self.adapter().await.search(query, n, filter).await.map_err(self.log_failure("search"))
    }

    /// See [`VectorStoreAdapter::similarity_search_with_score`].
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        n: usize,
        filter: Option<&FilterExpression>,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        self.adapter()
            .await
            .similarity_search_with_score(query, n, filter, score_threshold)
            .await
            .map_err(self.log_failure("similarity_search_with_score"))
    }

    /// See [`VectorStoreAdapter::delete_documents`].
    pub async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        self.adapter()
            .await
            .delete_documents(ids)
            .await
            .map_err(self.log_failure("delete_documents"))
    }

    /// See [`VectorStoreAdapter::update_documents`].
    pub async fn update_documents(
        &self,
        ids: &[String],
        documents: Option<&[String]>,
        metadatas: Option<&[Metadata]>,
    ) -> Result<()> {
        self.adapter()
            .await
            .update_documents(ids, documents, metadatas)
            .await
            .map_err(self.log_failure("update_documents"))
    }

    /// See [`VectorStoreAdapter::get_documents`].
    pub async fn get_documents(&self, ids: &[String]) -> Result<Vec<IndexedDocument>> {
        self.adapter().await.get_documents(ids).await.map_err(self.log_failure("get_documents"))
    }

    /// See [`VectorStoreAdapter::get_document_count`].
    pub async fn get_document_count(&self) -> Result<usize> {
        self.adapter()
            .await
            .get_document_count()
            .await
            .map_err(self.log_failure("get_document_count"))
    }

    /// See [`VectorStoreAdapter::clear_collection`].
    pub async fn clear_collection(&self) -> Result<()> {
        self.adapter().await.clear_collection().await.map_err(self.log_failure("clear_collection"))
    }

    /// See [`VectorStoreAdapter::persist`].
    pub async fn persist(&self) -> Result<()> {
        self.adapter().await.persist().await.map_err(self.log_failure("persist"))
    }

    /// Pick a backend from the default registry for the given requirements.
    pub fn recommended_store(requirements: &StoreRequirements) -> Option<String> {
        recommend(&AdapterRegistry::default(), requirements)
    }
}

/// Pick a registered backend for the given requirements.
///
/// Backends are filtered on their [`StoreInfo`] capabilities: no server
/// unless one is acceptable, persistence and filtering when required.
/// Among the rest, server backends win when a server is acceptable, then
/// backends suited to the requested scale (the largest one under
/// [`Priority::Speed`]), then the one whose persistence matches the need
/// exactly. Ties go to the first key in order.
///
/// Returns `None` when no registered backend qualifies.
pub fn recommend(registry: &AdapterRegistry, requirements: &StoreRequirements) -> Option<String> {
    let speed = requirements.priority == Priority::Speed;
    registry
        .all_stores_info()
        .into_iter()
        .filter(|(_, info)| {
            let caps = info.capabilities;
            (requirements.need_server || !caps.requires_server)
                && (!requirements.need_persistence || caps.persistent)
                && (!requirements.need_filtering || caps.supports_filtering)
        })
        .min_by_key(|(_, info)| {
            let caps = info.capabilities;
            (
                requirements.need_server && !caps.requires_server,
                info.scale < requirements.scale,
                Reverse(if speed { info.scale } else { Scale::Small }),
                caps.persistent != requirements.need_persistence,
            )
        })
        .map(|(key, _)| key)
}

impl std::fmt::Debug for VectorStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreManager")
            .field("collection_name", &self.collection_name)
            .field("embedding_model", &self.embedder.model_name())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdapterFuture;
    use crate::similarity::DistanceMetric;
    use crate::vectorstore::Capabilities;
    use crate::{flat, inmemory};

    fn unbuildable(_: AdapterContext, _: Value) -> AdapterFuture {
        Box::pin(async { Err(RagError::ConfigError("not constructible".to_string())) })
    }

    fn server(name: &'static str, scale: Scale) -> StoreInfo {
        StoreInfo {
            name,
            distance_metric: DistanceMetric::CosineSimilarity,
            capabilities: Capabilities {
                requires_server: true,
                persistent: true,
                supports_filtering: true,
                supports_updates: true,
            },
            scale,
        }
    }

    #[test]
    fn embedded_stores_without_server() {
        let registry = AdapterRegistry::default();
        let mut req = StoreRequirements::default();
        assert_eq!(recommend(&registry, &req).as_deref(), Some("memory"));
        req.need_persistence = true;
        assert_eq!(recommend(&registry, &req).as_deref(), Some("flat"));
    }

    #[test]
    fn server_choice_falls_back_when_not_compiled() {
        let registry = AdapterRegistry::default();
        let req = StoreRequirements {
            need_server: true,
            need_persistence: true,
            scale: Scale::Large,
            ..Default::default()
        };
        let expected = if cfg!(feature = "qdrant") {
            "qdrant"
        } else if cfg!(feature = "pgvector") {
            "pgvector"
        } else {
            "flat"
        };
        assert_eq!(recommend(&registry, &req).as_deref(), Some(expected));
    }

    #[test]
    fn server_choice_follows_scale_and_priority() {
        let mut registry = AdapterRegistry::empty();
        registry
            .register("qdrant", server("Qdrant", Scale::Large), unbuildable)
            .register("pgvector", server("pgvector", Scale::Medium), unbuildable)
            .register("memory", inmemory::STORE_INFO, unbuildable);

        let speed = StoreRequirements {
            need_server: true,
            priority: Priority::Speed,
            ..Default::default()
        };
        assert_eq!(recommend(&registry, &speed).as_deref(), Some("qdrant"));
        let balanced = StoreRequirements { need_server: true, ..Default::default() };
        assert_eq!(recommend(&registry, &balanced).as_deref(), Some("pgvector"));
        let large = StoreRequirements { scale: Scale::Large, ..balanced };
        assert_eq!(recommend(&registry, &large).as_deref(), Some("qdrant"));
    }

    #[test]
    fn capability_flags_exclude_backends() {
        let mut registry = AdapterRegistry::empty();
        registry.register("memory", inmemory::STORE_INFO, unbuildable);
        let persistent = StoreRequirements { need_persistence: true, ..Default::default() };
        assert_eq!(recommend(&registry, &persistent), None);

        // A server backend is never picked unless a server is acceptable.
        registry.register("qdrant", server("Qdrant", Scale::Large), unbuildable);
        assert_eq!(recommend(&registry, &persistent), None);

        registry.register("flat", flat::STORE_INFO, unbuildable);
        assert_eq!(recommend(&registry, &persistent).as_deref(), Some("flat"));
    }
}
