//! The table of known vector store backends.
//!
//! [`AdapterRegistry`] maps a store key such as `"qdrant"` to an async
//! constructor and a static [`StoreInfo`] descriptor. The default registry
//! holds every backend compiled into the crate, so the list of supported
//! stores is explicit and enumerable, and callers can compare backend
//! capabilities before constructing one.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::flat::{self, FlatIndexAdapter, FlatIndexConfig};
use crate::inmemory::{self, InMemoryAdapter, MemoryConfig};
use crate::vectorstore::{AdapterContext, StoreInfo, VectorStoreAdapter};

/// Future returned by an [`AdapterConstructor`].
pub type AdapterFuture = BoxFuture<'static, Result<Arc<dyn VectorStoreAdapter>>>;

/// Builds an adapter from its context and the backend's raw JSON config.
pub type AdapterConstructor = fn(AdapterContext, Value) -> AdapterFuture;

/// Deserialize a backend config. `null` means "all defaults".
pub fn parse_config<T: DeserializeOwned>(store_type: &str, config: Value) -> Result<T> {
    let config = if config.is_null() { Value::Object(Default::default()) } else { config };
    serde_json::from_value(config).map_err(|e| {
        RagError::ConfigError(format!("invalid config for store '{store_type}': {e}"))
    })
}

fn memory(context: AdapterContext, config: Value) -> AdapterFuture {
    Box::pin(async move {
        let config: MemoryConfig = parse_config("memory", config)?;
        let adapter: Arc<dyn VectorStoreAdapter> =
            Arc::new(InMemoryAdapter::from_config(context, config));
        Ok(adapter)
    })
}

fn flat_index(context: AdapterContext, config: Value) -> AdapterFuture {
    Box::pin(async move {
        let config: FlatIndexConfig = parse_config("flat", config)?;
        let adapter: Arc<dyn VectorStoreAdapter> =
            Arc::new(FlatIndexAdapter::open(context, config).await?);
        Ok(adapter)
    })
}

#[cfg(feature = "qdrant")]
fn qdrant(context: AdapterContext, config: Value) -> AdapterFuture {
    Box::pin(async move {
        let config: crate::qdrant::QdrantConfig = parse_config("qdrant", config)?;
        let adapter: Arc<dyn VectorStoreAdapter> =
            Arc::new(crate::qdrant::QdrantAdapter::connect(context, config).await?);
        Ok(adapter)
    })
}

#[cfg(feature = "pgvector")]
fn pgvector(context: AdapterContext, config: Value) -> AdapterFuture {
    Box::pin(async move {
        let config: crate::pgvector::PgVectorConfig = parse_config("pgvector", config)?;
        let adapter: Arc<dyn VectorStoreAdapter> =
            Arc::new(crate::pgvector::PgVectorAdapter::connect(context, config).await?);
        Ok(adapter)
    })
}

#[derive(Clone, Copy)]
struct Registration {
    info: StoreInfo,
    constructor: AdapterConstructor,
}

/// A map from store key to adapter constructor and descriptor.
///
/// Keys are case-insensitive. Aliases resolve to a canonical key.
///
/// # Example
///
/// ```rust,ignore
/// use ohlcv_rag::AdapterRegistry;
///
/// let registry = AdapterRegistry::default();
/// assert!(registry.available_stores().contains(&"memory".to_string()));
/// assert_eq!(registry.resolve("FAISS")?, "flat");
/// assert!(registry.store_info("flat")?.capabilities.persistent);
/// ```
#[derive(Clone)]
pub struct AdapterRegistry {
    stores: BTreeMap<String, Registration>,
    aliases: BTreeMap<String, String>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self { stores: BTreeMap::new(), aliases: BTreeMap::new() }
    }

    /// Register a backend under `key`, replacing any previous one.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        info: StoreInfo,
        constructor: AdapterConstructor,
    ) -> &mut Self {
        self.stores.insert(key.into().to_lowercase(), Registration { info, constructor });
        self
    }

    /// Make `alias` resolve to `key`.
    pub fn register_alias(
        &mut self,
        alias: impl Into<String>,
        key: impl Into<String>,
    ) -> &mut Self {
        self.aliases.insert(alias.into().to_lowercase(), key.into().to_lowercase());
        self
    }

    /// Canonical keys, sorted.
    pub fn available_stores(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Descriptor of the backend registered under `store_type` or an alias.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownStore`] listing the valid keys.
    pub fn store_info(&self, store_type: &str) -> Result<StoreInfo> {
        let key = self.resolve(store_type)?;
        Ok(self.stores[key].info)
    }

    /// Descriptors of every registered backend, keyed by canonical key.
    pub fn all_stores_info(&self) -> BTreeMap<String, StoreInfo> {
        self.stores.iter().map(|(key, registration)| (key.clone(), registration.info)).collect()
    }

    /// Whether `store_type` (or an alias of it) is registered.
    pub fn contains(&self, store_type: &str) -> bool {
        self.resolve(store_type).is_ok()
    }

    /// Resolve a key or alias to its canonical key.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownStore`] listing the valid keys.
    pub fn resolve(&self, store_type: &str) -> Result<&str> {
        let lowered = store_type.to_lowercase();
        let key = self.aliases.get(&lowered).unwrap_or(&lowered);
        self.stores.get_key_value(key).map(|(k, _)| k.as_str()).ok_or_else(|| {
            RagError::UnknownStore {
                store_type: store_type.to_string(),
                available: self.available_stores(),
            }
        })
    }

    /// Construct the adapter registered under `store_type`.
    pub async fn create(
        &self,
        store_type: &str,
        context: AdapterContext,
        config: Value,
    ) -> Result<Arc<dyn VectorStoreAdapter>> {
        let key = self.resolve(store_type)?;
        let constructor = self.stores[key].constructor;
        debug!(store_type = key, collection = %context.collection_name, "constructing adapter");
        constructor(context, config).await
    }
}

impl Default for AdapterRegistry {
    /// Every backend compiled into this build.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("memory", inmemory::STORE_INFO, memory)
            .register_alias("inmemory", "memory");
        registry.register("flat", flat::STORE_INFO, flat_index).register_alias("faiss", "flat");
        #[cfg(feature = "qdrant")]
        registry.register("qdrant", crate::qdrant::STORE_INFO, qdrant);
        #[cfg(feature = "pgvector")]
        registry.register("pgvector", crate::pgvector::STORE_INFO, pgvector);
        registry
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("stores", &self.available_stores())
            .field("aliases", &self.aliases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_registry_lists_embedded_backends() {
        let registry = AdapterRegistry::default();
        let stores = registry.available_stores();
        assert!(stores.contains(&"memory".to_string()));
        assert!(stores.contains(&"flat".to_string()));
        assert!(!stores.contains(&"faiss".to_string()));
        let mut sorted = stores.clone();
        sorted.sort();
        assert_eq!(stores, sorted);
    }

    #[test]
    fn aliases_and_case_resolve() {
        let registry = AdapterRegistry::default();
        assert_eq!(registry.resolve("FAISS").unwrap(), "flat");
        assert_eq!(registry.resolve("InMemory").unwrap(), "memory");
        assert_eq!(registry.resolve("memory").unwrap(), "memory");
    }

    #[test]
    fn unknown_store_lists_valid_keys() {
        let err = AdapterRegistry::default().resolve("chromadb").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("chromadb"));
        assert!(message.contains("memory"));
        assert!(message.contains("flat"));
    }

    #[test]
    fn store_info_is_available_without_constructing() {
        let registry = AdapterRegistry::default();
        let flat = registry.store_info("FAISS").unwrap();
        assert_eq!(flat.name, "Flat index");
        assert!(flat.capabilities.persistent);
        assert!(!flat.capabilities.supports_updates);
        assert!(!registry.store_info("memory").unwrap().capabilities.persistent);
        assert!(registry.store_info("chromadb").is_err());

        let all = registry.all_stores_info();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), registry.available_stores());
        assert!(all.values().all(|info| info.capabilities.supports_filtering));
    }

    #[test]
    fn config_rejects_unknown_fields() {
        assert!(parse_config::<MemoryConfig>("memory", json!({"bogus": 1})).is_err());
        assert!(parse_config::<MemoryConfig>("memory", Value::Null).is_ok());
        let flat: FlatIndexConfig =
            parse_config("flat", json!({"persist_directory": "/tmp/index"})).unwrap();
        assert!(flat.persist_directory.is_some());
    }
}
