//! Vector store abstraction and retrieval ranking for OHLCV window summaries.
//!
//! This crate provides:
//! - One [`VectorStoreAdapter`] contract over several search engines, with
//!   scores unified into a `[0, 1]` similarity
//! - A generic metadata [`FilterExpression`] translated per backend
//! - [`VectorStoreManager`], a facade that owns the active backend and can
//!   switch it at runtime
//! - [`Retriever`], which over-fetches, thresholds, reranks and truncates
//! - [`ResultRanker`], a multi-factor ranker (similarity, recency,
//!   metadata completeness, lexical relevance)
//!
//! # Backends
//!
//! | key | feature | notes |
//! |---|---|---|
//! | `memory` | always | in-process, not persistent |
//! | `flat` | always | exact flat index with optional JSON snapshot |
//! | `qdrant` | `qdrant` | Qdrant over gRPC |
//! | `pgvector` | `pgvector` | PostgreSQL with the pgvector extension |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ohlcv_rag::{
//!     Document, FilterExpression, HashingEmbedder, Retriever, RetrieverConfig,
//!     VectorStoreManager,
//! };
//! use serde_json::json;
//!
//! let embedder = Arc::new(HashingEmbedder::default());
//! let manager = Arc::new(
//!     VectorStoreManager::create("memory", "ohlcv", embedder, json!({})).await?,
//! );
//! manager
//!     .add_documents(
//!         &[Document::new("AAPL uptrend strong gains")
//!             .with_field("ticker", "AAPL")
//!             .with_field("end_date", "2024-01-15")],
//!         None,
//!     )
//!     .await?;
//!
//! let retriever = Retriever::new(RetrieverConfig::default()).with_store(manager);
//! let filter = FilterExpression::new().eq("ticker", "AAPL")?;
//! let results = retriever.retrieve("AAPL uptrend", Some(2), Some(&filter)).await?;
//! ```

pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod flat;
pub mod hashing;
pub mod inmemory;
pub mod manager;
pub mod registry;
pub mod reranker;
pub mod retriever;
pub mod similarity;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "pgvector")]
pub mod pgvector;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use config::{RetrieverConfig, RetrieverConfigBuilder};
pub use document::{Document, IndexedDocument, Metadata, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{ErrorKind, RagError, Result};
pub use filter::{FieldCondition, FilterExpression, FilterOp, FilterValue};
pub use flat::{FlatIndexAdapter, FlatIndexConfig};
pub use hashing::{DEFAULT_HASHING_DIMENSIONS, HashingEmbedder};
pub use inmemory::{InMemoryAdapter, MemoryConfig};
pub use manager::{Priority, StoreRequirements, VectorStoreManager, recommend};
pub use registry::{AdapterConstructor, AdapterFuture, AdapterRegistry};
pub use reranker::{NoOpReranker, RankingFactors, RankingWeights, Reranker, ResultRanker};
pub use retriever::{RetrievalStats, Retriever, RetrieverStatus, pattern_query};
pub use similarity::{DistanceMetric, to_similarity};
pub use vectorstore::{
    AdapterContext, AdapterInfo, Capabilities, DEFAULT_BATCH_SIZE, Scale, StoreInfo,
    VectorStoreAdapter,
};

#[cfg(feature = "openai")]
pub use openai::{OpenAIConfig, OpenAIEmbeddingProvider};
#[cfg(feature = "pgvector")]
pub use pgvector::{PgVectorAdapter, PgVectorConfig};
#[cfg(feature = "qdrant")]
pub use qdrant::{QdrantAdapter, QdrantConfig};
