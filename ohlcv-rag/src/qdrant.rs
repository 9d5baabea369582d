//! Qdrant vector store backend.
//!
//! Provides [`QdrantAdapter`] which implements [`VectorStoreAdapter`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Documents are stored as points with payload
//! `{ "doc_id", "document", "metadata": { .. } }`. Qdrant only accepts
//! UUID or integer point ids, so arbitrary caller ids are mapped to a
//! deterministic UUID v5 and the caller's id travels in `doc_id`.
//!
//! Filter translation: equality and numeric ranges become a native
//! [`Filter`] over `metadata.<field>`. String ranges (ISO dates) have no
//! native counterpart without a typed payload index, so they are
//! evaluated client-side on an over-fetched candidate set.
//!
//! # Example
//!
//! ```rust,ignore
//! use ohlcv_rag::qdrant::{QdrantAdapter, QdrantConfig};
//!
//! let store = QdrantAdapter::connect(context, QdrantConfig::default()).await?;
//! store.add_documents(&documents, None).await?;
//! let results = store.search("AAPL uptrend", 5, None).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    GetPointsBuilder, PointId, PointStruct, PointsIdsList, Range, SearchPointsBuilder,
    SetPayloadPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{Document, IndexedDocument, Metadata, SearchResult, sort_by_score};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::{FieldCondition, FilterExpression, FilterOp, FilterValue};
use crate::similarity::{DistanceMetric, to_similarity};
use crate::vectorstore::{
    AdapterContext, AdapterInfo, Capabilities, Scale, StoreInfo, VectorStoreAdapter, check_limit,
    check_update_lengths, embed_query, embed_texts, last_occurrences, resolve_ids,
};

const BACKEND: &str = "qdrant";

/// Static descriptor registered for this backend.
pub const STORE_INFO: StoreInfo = StoreInfo {
    name: "Qdrant",
    distance_metric: DistanceMetric::CosineSimilarity,
    capabilities: Capabilities {
        requires_server: true,
        persistent: true,
        supports_filtering: true,
        supports_updates: true,
    },
    scale: Scale::Large,
};
const DOC_ID_KEY: &str = "doc_id";
const DOCUMENT_KEY: &str = "document";
const METADATA_KEY: &str = "metadata";

fn default_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_fetch_factor() -> usize {
    4
}

/// Configuration for [`QdrantAdapter`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QdrantConfig {
    /// gRPC endpoint.
    #[serde(default = "default_url")]
    pub url: String,
    /// API key for Qdrant Cloud.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Over-fetch multiplier used when part of a filter is post-filtered.
    #[serde(default = "default_fetch_factor")]
    pub post_filter_fetch_factor: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self { url: default_url(), api_key: None, post_filter_fetch_factor: default_fetch_factor() }
    }
}

/// A filter split into the part Qdrant evaluates and the part evaluated
/// client-side.
#[derive(Debug, Clone, Default)]
pub struct QdrantFilterPlan {
    /// Native filter, `None` when there are no native conditions.
    pub native: Option<Filter>,
    /// Conditions to post-filter.
    pub residual: FilterExpression,
}

fn payload_key(field: &str) -> String {
    format!("{METADATA_KEY}.{field}")
}

fn is_native(condition: &FieldCondition) -> bool {
    match (&condition.value, condition.op.is_range()) {
        (FilterValue::Number(_), _) => true,
        (FilterValue::String(_) | FilterValue::Bool(_), false) => true,
        (FilterValue::String(_) | FilterValue::Bool(_), true) => false,
    }
}

fn match_condition(key: String, value: &FilterValue) -> Condition {
    match value {
        FilterValue::String(s) => Condition::matches(key, s.clone()),
        FilterValue::Bool(b) => Condition::matches(key, *b),
        // Range equality works for integer and double payloads alike.
        FilterValue::Number(n) => {
            Condition::range(key, Range { gte: Some(*n), lte: Some(*n), ..Default::default() })
        }
    }
}

/// Translate a generic filter into a Qdrant filter plus a residual.
pub fn translate_filter(filter: &FilterExpression) -> QdrantFilterPlan {
    let (native, residual) = filter.partition(is_native);
    if native.is_empty() {
        return QdrantFilterPlan { native: None, residual };
    }

    let mut must = Vec::new();
    let mut must_not = Vec::new();
    for condition in native.conditions() {
        let key = payload_key(&condition.field);
        match (condition.op, &condition.value) {
            (FilterOp::Eq, value) => must.push(match_condition(key, value)),
            (FilterOp::Ne, value) => {
                // A missing field never matches, so require presence.
                must_not.push(Condition::is_empty(key.clone()));
                must_not.push(match_condition(key, value));
            }
            (op, FilterValue::Number(n)) => {
                let mut range = Range::default();
                match op {
                    FilterOp::Gt => range.gt = Some(*n),
                    FilterOp::Gte => range.gte = Some(*n),
                    FilterOp::Lt => range.lt = Some(*n),
                    FilterOp::Lte => range.lte = Some(*n),
                    FilterOp::Eq | FilterOp::Ne => {}
                }
                must.push(Condition::range(key, range));
            }
            // Excluded by `is_native`.
            (_, FilterValue::String(_) | FilterValue::Bool(_)) => {}
        }
    }

    QdrantFilterPlan { native: Some(Filter { must, must_not, ..Default::default() }), residual }
}

/// Map a caller id onto a valid Qdrant point id.
pub fn point_id(id: &str) -> String {
    match Uuid::parse_str(id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

fn point_ids(ids: &[String]) -> Vec<PointId> {
    ids.iter().map(|id| PointId::from(point_id(id))).collect()
}

/// Convert a Qdrant payload value to JSON.
fn qdrant_to_json(value: &QdrantValue) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null)
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(s)) => {
            Value::Object(s.fields.iter().map(|(k, v)| (k.clone(), qdrant_to_json(v))).collect())
        }
    }
}

fn build_payload(id: &str, text: &str, metadata: &Metadata) -> Result<Payload> {
    let mut payload = Map::new();
    payload.insert(DOC_ID_KEY.to_string(), Value::String(id.to_string()));
    payload.insert(DOCUMENT_KEY.to_string(), Value::String(text.to_string()));
    payload.insert(
        METADATA_KEY.to_string(),
        Value::Object(metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    Payload::try_from(Value::Object(payload)).map_err(QdrantAdapter::map_err("add_documents"))
}

fn read_payload(
    payload: &std::collections::HashMap<String, QdrantValue>,
) -> (Option<String>, String, Metadata) {
    let doc_id = payload.get(DOC_ID_KEY).and_then(|v| match &v.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    });
    let text = payload
        .get(DOCUMENT_KEY)
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default();
    let metadata = payload
        .get(METADATA_KEY)
        .map(qdrant_to_json)
        .and_then(|v| match v {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        })
        .unwrap_or_default();
    (doc_id, text, metadata)
}

/// A [`VectorStoreAdapter`] backed by [Qdrant](https://qdrant.tech/).
///
/// The collection uses cosine distance; Qdrant reports cosine similarity,
/// which is clamped into `[0, 1]`.
pub struct QdrantAdapter {
    client: Qdrant,
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    config: QdrantConfig,
}

impl QdrantAdapter {
    /// Connect to Qdrant and make sure the collection exists.
    pub async fn connect(context: AdapterContext, config: QdrantConfig) -> Result<Self> {
        if config.post_filter_fetch_factor == 0 {
            return Err(RagError::ConfigError(
                "post_filter_fetch_factor must be greater than zero".to_string(),
            ));
        }
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .build()
            .map_err(Self::map_err("connect"))?;
        Self::from_client(client, context, config).await
    }

    /// Wrap an existing client and make sure the collection exists.
    pub async fn from_client(
        client: Qdrant,
        context: AdapterContext,
        config: QdrantConfig,
    ) -> Result<Self> {
        let adapter = Self {
            client,
            dimensions: context.embedder.dimensions(),
            collection_name: context.collection_name,
            embedder: context.embedder,
            config,
        };
        adapter.ensure_collection().await?;
        Ok(adapter)
    }

    fn map_err(operation: &'static str) -> impl Fn(qdrant_client::QdrantError) -> RagError {
        move |e| RagError::operation(operation, BACKEND, e)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(Self::map_err("create_collection"))?;
        if exists {
            debug!(
                collection = %self.collection_name,
                "qdrant collection already exists, skipping creation"
            );
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                    VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(Self::map_err("create_collection"))?;

        info!(
            collection = %self.collection_name,
            dimensions = self.dimensions,
            "created qdrant collection"
        );
        Ok(())
    }

    async fn upsert(&self, operation: &'static str, points: Vec<PointStruct>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let count = points.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .map_err(Self::map_err(operation))?;
        debug!(collection = %self.collection_name, count, "upserted points to qdrant");
        Ok(())
    }
}

#[async_trait]
impl VectorStoreAdapter for QdrantAdapter {
    async fn add_documents(
        &self,
        documents: &[Document],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let ids = resolve_ids(documents.len(), ids)?;
        if documents.is_empty() {
            return Ok(ids);
        }

        // One point per id; a repeated id keeps its last document.
        let keep = last_occurrences(&ids);
        let texts: Vec<&str> = keep.iter().map(|&i| documents[i].text.as_str()).collect();
        let embeddings =
            embed_texts(self.embedder.as_ref(), &texts, self.dimensions, "add_documents", BACKEND)
                .await?;

        let mut points = Vec::with_capacity(keep.len());
        for (&i, embedding) in keep.iter().zip(embeddings) {
            let (id, document) = (&ids[i], &documents[i]);
            let payload = build_payload(id, &document.text, &document.metadata)?;
            points.push(PointStruct::new(point_id(id), embedding, payload));
        }
        self.upsert("add_documents", points).await?;
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

        let plan = filter.map(translate_filter).unwrap_or_default();
        let post_filtered = !plan.residual.is_empty();
        if post_filtered {
            warn!(
                collection = %self.collection_name,
                residual = plan.residual.conditions().len(),
                "post-filtering conditions qdrant cannot evaluate natively"
            );
        }
        let limit = fetch_limit(n, self.config.post_filter_fetch_factor, post_filtered);

        let mut request = SearchPointsBuilder::new(&self.collection_name, embedding, limit)
            .with_payload(true);
        if let Some(native) = plan.native {
            request = request.filter(native);
        }
        let response = self.client.search_points(request).await.map_err(Self::map_err("search"))?;

        let mut results: Vec<SearchResult> = response
            .result
            .into_iter()
            .filter_map(|scored| {
                let (doc_id, text, metadata) = read_payload(&scored.payload);
                if !plan.residual.matches(&metadata) {
                    return None;
                }
                let id = doc_id.unwrap_or_default();
                Some(SearchResult::new(
                    id,
                    text,
                    metadata,
                    to_similarity(DistanceMetric::CosineSimilarity, scored.score),
                ))
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(n);
        Ok(results)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(PointsIdsList { ids: point_ids(ids) })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err("delete_documents"))?;
        debug!(collection = %self.collection_name, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn update_documents(
        &self,
        ids: &[String],
        documents: Option<&[String]>,
        metadatas: Option<&[Metadata]>,
    ) -> Result<()> {
        check_update_lengths(ids, documents, metadatas)?;
        if ids.is_empty() {
            return Ok(());
        }

        let existing = self.get_documents(ids).await?;
        if let Some(missing) = ids.iter().find(|id| !existing.iter().any(|d| &d.id == *id)) {
            return Err(RagError::operation(
                "update_documents",
                BACKEND,
                format!("document '{missing}' does not exist"),
            ));
        }

        match documents {
            Some(documents) => {
                let keep = last_occurrences(ids);
                let texts: Vec<&str> = keep.iter().map(|&i| documents[i].as_str()).collect();
                let embeddings = embed_texts(
                    self.embedder.as_ref(),
                    &texts,
                    self.dimensions,
                    "update_documents",
                    BACKEND,
                )
                .await?;
                let mut points = Vec::with_capacity(keep.len());
                for (&i, embedding) in keep.iter().zip(embeddings) {
                    let id = &ids[i];
                    let metadata = match metadatas {
                        Some(metadatas) => metadatas[i].clone(),
                        None => existing
                            .iter()
                            .find(|d| &d.id == id)
                            .map(|d| d.metadata.clone())
                            .unwrap_or_default(),
                    };
                    let payload = build_payload(id, &documents[i], &metadata)?;
                    points.push(PointStruct::new(point_id(id), embedding, payload));
                }
                self.upsert("update_documents", points).await
            }
            None => {
                let Some(metadatas) = metadatas else {
                    return Ok(());
                };
                for (id, metadata) in ids.iter().zip(metadatas) {
                    // Replaces the whole `metadata` key; `document` stays.
                    let fields = metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    let mut payload = Map::new();
                    payload.insert(METADATA_KEY.to_string(), Value::Object(fields));
                    let payload = Payload::try_from(Value::Object(payload))
                        .map_err(Self::map_err("update_documents"))?;
                    let selector = PointsIdsList { ids: point_ids(std::slice::from_ref(id)) };
                    self.client
                        .set_payload(
                            SetPayloadPointsBuilder::new(&self.collection_name, payload)
                                .points_selector(selector)
                                .wait(true),
                        )
                        .await
                        .map_err(Self::map_err("update_documents"))?;
                }
                Ok(())
            }
        }
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<IndexedDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection_name, point_ids(ids)).with_payload(true),
            )
            .await
            .map_err(Self::map_err("get_documents"))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let (doc_id, text, metadata) = read_payload(&point.payload);
                doc_id.map(|id| IndexedDocument { id, text, metadata })
            })
            .collect())
    }

    async fn get_document_count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection_name).exact(true))
            .await
            .map_err(Self::map_err("get_document_count"))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn clear_collection(&self) -> Result<()> {
        self.client
            .delete_collection(&self.collection_name)
            .await
            .map_err(Self::map_err("clear_collection"))?;
        self.ensure_collection().await?;
        info!(collection = %self.collection_name, "cleared qdrant collection");
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

/// Points to request from qdrant for `n` results. Over-fetches when part
/// of the filter is applied afterwards.
fn fetch_limit(n: usize, factor: usize, post_filtered: bool) -> u64 {
    let limit = if post_filtered { n.saturating_mul(factor) } else { n };
    u64::try_from(limit).unwrap_or(u64::MAX)
}
